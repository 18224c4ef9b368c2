use std::collections::HashSet;

use petgraph::{
    dot::{Config, Dot},
    graph::NodeIndex,
    Graph as PetGraph,
};

use crate::{
    arena::{Arena, ArenaMetrics},
    ops::{Node, Op},
    AllocationKind, DType, Error, Result, Shape, Tensor,
};

/// An independently allocatable and invocable list of operators over its own
/// tensors.
///
/// Tensor indices are stable for the lifetime of the subgraph. Operators run
/// in the order they were added.
#[derive(Debug)]
pub struct Subgraph {
    name: Option<String>,
    pub(crate) tensors: Vec<Tensor>,
    pub(crate) nodes: Vec<Node>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    pub(crate) arena: Arena,
    pub(crate) needs_allocation: bool,
}

impl Default for Subgraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Subgraph {
    pub fn new() -> Self {
        Self {
            name: None,
            tensors: Vec::new(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            arena: Arena::new(),
            needs_allocation: true,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Append a tensor and return its index.
    pub fn add_tensor(&mut self, tensor: Tensor) -> usize {
        self.tensors.push(tensor);
        self.needs_allocation = true;
        self.tensors.len() - 1
    }

    /// Append a constant tensor holding `data` and return its index.
    pub fn add_constant<T: DType>(&mut self, shape: impl Into<Shape>, data: Vec<T>) -> Result<usize> {
        Ok(self.add_tensor(Tensor::constant(shape, data)?))
    }

    fn check_tensor(&self, index: usize) -> Result<()> {
        if index < self.tensors.len() {
            Ok(())
        } else {
            Err(Error::InvalidTensor { index })
        }
    }

    /// Declare which tensors callers supply.
    pub fn set_inputs(&mut self, inputs: Vec<usize>) -> Result<()> {
        for &index in &inputs {
            self.check_tensor(index)?;
        }
        self.inputs = inputs;
        self.needs_allocation = true;
        Ok(())
    }

    /// Declare which tensors callers read back. An output may repeat an input
    /// index to pass that value through unchanged.
    pub fn set_outputs(&mut self, outputs: Vec<usize>) -> Result<()> {
        for &index in &outputs {
            self.check_tensor(index)?;
        }
        self.outputs = outputs;
        self.needs_allocation = true;
        Ok(())
    }

    /// Append an operator reading `inputs` and writing `outputs`.
    pub fn add_node(&mut self, op: Op, inputs: Vec<usize>, outputs: Vec<usize>) -> Result<usize> {
        for &index in inputs.iter().chain(outputs.iter()) {
            self.check_tensor(index)?;
        }
        for &index in &outputs {
            if inputs.contains(&index) {
                crate::bail!("{} writes tensor {index}, which it also reads", op.name());
            }
            if self.tensors[index].kind() == AllocationKind::Constant {
                crate::bail!("{} writes constant tensor {index}", op.name());
            }
        }
        self.nodes.push(Node {
            op,
            inputs,
            outputs,
        });
        self.needs_allocation = true;
        Ok(self.nodes.len() - 1)
    }

    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn tensors_len(&self) -> usize {
        self.tensors.len()
    }

    pub fn tensor(&self, index: usize) -> Option<&Tensor> {
        self.tensors.get(index)
    }

    pub fn tensor_mut(&mut self, index: usize) -> Option<&mut Tensor> {
        self.tensors.get_mut(index)
    }

    /// The tensor bound to input slot `position`.
    pub fn input_tensor(&self, position: usize) -> Option<&Tensor> {
        self.inputs.get(position).and_then(|&i| self.tensors.get(i))
    }

    pub(crate) fn input_tensor_mut(&mut self, position: usize) -> Option<&mut Tensor> {
        let index = *self.inputs.get(position)?;
        self.tensors.get_mut(index)
    }

    /// The tensor bound to output slot `position`.
    pub fn output_tensor(&self, position: usize) -> Option<&Tensor> {
        self.outputs.get(position).and_then(|&i| self.tensors.get(i))
    }

    /// Whether output slot `position` is declared as a pass-through of input
    /// slot `position`.
    pub fn is_pass_through(&self, position: usize) -> bool {
        matches!(
            (self.inputs.get(position), self.outputs.get(position)),
            (Some(i), Some(o)) if i == o
        )
    }

    /// Set the shape of an input tensor. Takes effect at the next allocation pass.
    pub fn resize_input_tensor(&mut self, index: usize, dims: &[usize]) -> Result<()> {
        self.check_tensor(index)?;
        if !self.inputs.contains(&index) {
            crate::bail!("tensor {index} is not an input of this subgraph");
        }
        let shape = Shape::from(dims);
        if self.tensors[index].shape() != &shape || self.tensors[index].is_deferred() {
            if let Some(released) = self.tensors[index].resize(shape)? {
                self.arena.release(released);
            }
            self.needs_allocation = true;
        }
        Ok(())
    }

    /// Whether the next invocation runs an allocation pass first.
    pub fn needs_allocation(&self) -> bool {
        self.needs_allocation
    }

    pub fn arena_metrics(&self) -> ArenaMetrics {
        self.arena.metrics()
    }

    /// Indices of the subgraphs this subgraph's operators invoke.
    pub fn referenced_subgraphs(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter_map(|node| node.op().as_while())
            .flat_map(|w| [w.cond_subgraph(), w.body_subgraph()])
            .collect()
    }

    /// Drop storage that input slots only borrow from someone else.
    pub(crate) fn release_input_aliases(&mut self) {
        for &index in &self.inputs {
            let tensor = &mut self.tensors[index];
            if tensor.kind() == AllocationKind::Dynamic && tensor.ref_count() > 1 {
                tensor.take_buffer();
            }
        }
    }

    /// Check that every operator input is produced before it is read.
    pub(crate) fn validate(&self) -> Result<()> {
        let mut available: HashSet<usize> = self.inputs.iter().copied().collect();
        available.extend(
            self.tensors
                .iter()
                .enumerate()
                .filter(|(_, t)| t.kind() == AllocationKind::Constant)
                .map(|(i, _)| i),
        );
        for (position, node) in self.nodes.iter().enumerate() {
            if let Some(missing) = node.inputs.iter().find(|&&i| !available.contains(&i)) {
                crate::bail!(
                    "node {position} ({}) reads tensor {missing} before anything writes it",
                    node.op.name()
                );
            }
            if let Some(written) = node.outputs.iter().find(|&&i| self.inputs.contains(&i)) {
                crate::bail!(
                    "node {position} ({}) overwrites subgraph input {written}",
                    node.op.name()
                );
            }
            available.extend(node.outputs.iter().copied());
        }
        if let Some(missing) = self.outputs.iter().find(|&&i| !available.contains(&i)) {
            crate::bail!("subgraph output {missing} is never written");
        }
        Ok(())
    }

    pub fn to_petgraph(&self) -> PetGraph<String, ()> {
        let mut g = PetGraph::<String, ()>::new();
        let mut producers: Vec<Option<NodeIndex>> = vec![None; self.tensors.len()];

        // 1) Sources: subgraph inputs and constants
        for (position, &index) in self.inputs.iter().enumerate() {
            producers[index] = Some(g.add_node(format!("Input({position})")));
        }
        for (index, tensor) in self.tensors.iter().enumerate() {
            if tensor.kind() == AllocationKind::Constant {
                producers[index] = Some(g.add_node(format!("Const{}", tensor.shape())));
            }
        }

        // 2) Operators in execution order, wired to whatever produced their inputs
        for node in &self.nodes {
            let dst = g.add_node(node.op.label());
            for &input in &node.inputs {
                if let Some(src) = producers[input] {
                    g.add_edge(src, dst, ());
                }
            }
            for &output in &node.outputs {
                producers[output] = Some(dst);
            }
        }

        // 3) Sinks
        for (position, &index) in self.outputs.iter().enumerate() {
            let dst = g.add_node(format!("Output({position})"));
            if let Some(src) = producers[index] {
                g.add_edge(src, dst, ());
            }
        }

        g
    }

    /// Produce a DOT format string of this subgraph.
    pub fn to_dot(&self) -> String {
        let g = self.to_petgraph();
        format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel]))
    }
}
