//! Kept in its own test binary: peak RSS is process-wide.

use looptensor_core::{
    builder::{self, BODY_SUBGRAPH, COND_SUBGRAPH},
    memory::{memory_usage, PeakMemoryBudget},
    AllocationKind, Interpreter, InterpreterOptions,
};

const N: usize = 1_000_000;
const TENSOR_BYTES: usize = N * std::mem::size_of::<i32>();

#[test]
fn shallow_copy_keeps_allocation_peak_bounded() {
    let mut interpreter = Interpreter::new();
    interpreter.add_subgraphs(2);
    builder::build_less_equal_cond_subgraph(interpreter.subgraph_mut(COND_SUBGRAPH).unwrap(), 3)
        .unwrap();
    builder::build_accumulate_loop_body_subgraph(interpreter.subgraph_mut(BODY_SUBGRAPH).unwrap())
        .unwrap();
    builder::build_while_subgraph(interpreter.primary_subgraph_mut()).unwrap();

    let inputs = interpreter.inputs().to_vec();
    interpreter.resize_input_tensor(inputs[0], &[1]).unwrap();
    interpreter.resize_input_tensor(inputs[1], &[N]).unwrap();
    let mut options = InterpreterOptions::new();
    options.optimize_memory_for_large_tensors(N);
    interpreter.apply_options(&options).unwrap();

    let before = memory_usage();
    interpreter.allocate_tensors().unwrap();
    let after = memory_usage();
    if before.is_supported() {
        let budget = PeakMemoryBudget::default();
        assert!(
            budget.allows(TENSOR_BYTES, before, after),
            "peak grew by {} kB, budget {} kB",
            after.max_rss_kb - before.max_rss_kb,
            budget.limit_kb(TENSOR_BYTES)
        );
    }

    // Large tensors are left to be allocated when first written.
    let primary_input = interpreter.tensor(inputs[1]).unwrap();
    assert_eq!(primary_input.kind(), AllocationKind::Dynamic);
    assert!(!primary_input.is_allocated());

    interpreter
        .tensor_mut(inputs[0])
        .unwrap()
        .copy_from_slice(&[1i32])
        .unwrap();
    interpreter
        .tensor_mut(inputs[1])
        .unwrap()
        .copy_from_slice(&vec![1i32; N])
        .unwrap();
    interpreter.invoke().unwrap();

    let body = interpreter.subgraph(BODY_SUBGRAPH).unwrap();
    assert_eq!(body.input_tensor(1).unwrap().kind(), AllocationKind::Dynamic);
    let acc = interpreter.tensor(interpreter.outputs()[1]).unwrap();
    assert!(acc.data::<i32>().unwrap().iter().all(|&v| v == 10));
    assert!(acc.shares_buffer_with(body.output_tensor(1).unwrap()));
    // Held by the body output and the primary output only.
    assert_eq!(acc.ref_count(), 2);
}
