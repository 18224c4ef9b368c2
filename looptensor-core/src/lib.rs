//! Looptensor is a small graph interpreter built around a `While` control-flow operator.
//!
//! A model is a table of subgraphs. Each subgraph owns its tensors and runs its operators in the
//! order they were added. The [`Op::While`] operator repeatedly invokes a condition subgraph and
//! a body subgraph, threading loop-carried tensors between them until the condition is false.
//!
//! Loop-carried values are either copied or shared between iterations. Once a tensor is at least
//! [`InterpreterOptions::large_tensor_threshold`] bytes it is allocated dynamically and handed
//! over as another reference to the same storage; any later write copies first.
//!
//! ## A quick guide
//! - Create an [`Interpreter`] and add the subgraphs a `While` refers to with [`Interpreter::add_subgraphs`].
//! - Fill the subgraphs, for example with the helpers in [`builder`].
//! - Size the primary inputs with [`Interpreter::resize_input_tensor`] and run [`Interpreter::allocate_tensors`].
//! - Write the inputs, then [`Interpreter::invoke`] and read the outputs.
//!
//! ## What can you do with it?
//! ```
//! use looptensor_core::{builder, Interpreter};
//!
//! let mut interpreter = Interpreter::new();
//! interpreter.add_subgraphs(2);
//! builder::build_less_equal_cond_subgraph(interpreter.subgraph_mut(1).unwrap(), 3).unwrap();
//! builder::build_accumulate_loop_body_subgraph(interpreter.subgraph_mut(2).unwrap()).unwrap();
//! builder::build_while_subgraph(interpreter.primary_subgraph_mut()).unwrap();
//!
//! let (counter, acc) = (interpreter.inputs()[0], interpreter.inputs()[1]);
//! interpreter.resize_input_tensor(counter, &[1]).unwrap();
//! interpreter.resize_input_tensor(acc, &[1]).unwrap();
//! interpreter.allocate_tensors().unwrap();
//! interpreter.tensor_mut(counter).unwrap().copy_from_slice(&[1i32]).unwrap();
//! interpreter.tensor_mut(acc).unwrap().copy_from_slice(&[1i32]).unwrap();
//!
//! interpreter.invoke().unwrap();
//!
//! let out = interpreter.outputs()[1];
//! assert_eq!(interpreter.tensor(out).unwrap().to_vec::<i32>().unwrap(), vec![10]);
//! ```

mod arena;
pub mod builder;
mod config;
mod control_flow;
mod dtype;
mod error;
mod executor;
mod interpreter;
pub mod memory;
pub mod ops;
mod shape;
mod subgraph;
mod tensor;
pub mod transfer;

pub use arena::ArenaMetrics;
pub use config::InterpreterOptions;
pub use control_flow::{WhileController, WhileState};
pub use dtype::{DType, ElementType};
pub use error::{Context, Error, Result};
pub use executor::SubgraphTable;
pub use interpreter::{Interpreter, PRIMARY_SUBGRAPH};
pub use ops::{Node, Op};
pub use shape::Shape;
pub use subgraph::Subgraph;
pub use tensor::{AllocationKind, Buffer, SharedBuffer, Tensor};
