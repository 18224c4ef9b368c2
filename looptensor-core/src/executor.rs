use petgraph::{algo::is_cyclic_directed, graphmap::DiGraphMap};

use crate::{
    ops::{Node, NodeContext},
    subgraph::Subgraph,
    tensor::SharedBuffer,
    transfer::{Access, TransferPolicy},
    AllocationKind, Error, InterpreterOptions, Result, Shape, Tensor,
};

/// Index-addressed storage for every subgraph of an interpreter.
///
/// A subgraph being run is checked out of its slot, so a second attempt to
/// run it before it returns fails with [`Error::SubgraphBusy`].
#[derive(Debug, Default)]
pub struct SubgraphTable {
    slots: Vec<Option<Subgraph>>,
}

impl SubgraphTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn push(&mut self, subgraph: Subgraph) -> usize {
        self.slots.push(Some(subgraph));
        self.slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<&Subgraph> {
        self.slots
            .get(index)
            .ok_or(Error::InvalidSubgraph { index })?
            .as_ref()
            .ok_or(Error::SubgraphBusy { index })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Subgraph> {
        self.slots
            .get_mut(index)
            .ok_or(Error::InvalidSubgraph { index })?
            .as_mut()
            .ok_or(Error::SubgraphBusy { index })
    }

    /// Run `f` on subgraph `index` with the rest of the table available.
    ///
    /// The subgraph is put back whether or not `f` succeeds.
    pub(crate) fn with<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Subgraph, &mut SubgraphTable) -> Result<R>,
    ) -> Result<R> {
        let mut subgraph = self
            .slots
            .get_mut(index)
            .ok_or(Error::InvalidSubgraph { index })?
            .take()
            .ok_or(Error::SubgraphBusy { index })?;
        let result = f(&mut subgraph, self);
        self.slots[index] = Some(subgraph);
        result
    }

    /// Edges from each subgraph to the subgraphs its operators invoke.
    pub fn call_graph(&self) -> Result<DiGraphMap<usize, ()>> {
        let mut graph = DiGraphMap::new();
        for (caller, slot) in self.slots.iter().enumerate() {
            let subgraph = slot.as_ref().ok_or(Error::SubgraphBusy { index: caller })?;
            graph.add_node(caller);
            for callee in subgraph.referenced_subgraphs() {
                if callee >= self.slots.len() {
                    return Err(Error::InvalidSubgraph { index: callee });
                }
                graph.add_edge(caller, callee, ());
            }
        }
        Ok(graph)
    }

    pub(crate) fn check_acyclic(&self) -> Result<()> {
        if is_cyclic_directed(&self.call_graph()?) {
            return Err(Error::RecursiveSubgraphs);
        }
        Ok(())
    }

    pub(crate) fn mark_for_allocation(&mut self) {
        for subgraph in self.slots.iter_mut().flatten() {
            subgraph.needs_allocation = true;
        }
    }
}

impl Subgraph {
    /// Shape inference followed by storage assignment.
    ///
    /// Every operator prepares in declared order. Tensors of at least the
    /// large-tensor threshold become `Dynamic`; remaining `Static` tensors get
    /// arena storage, while `Dynamic` ones stay unallocated until written.
    pub(crate) fn allocate(
        &mut self,
        table: &mut SubgraphTable,
        options: &InterpreterOptions,
    ) -> Result<()> {
        self.validate()?;
        let Subgraph {
            tensors,
            nodes,
            arena,
            ..
        } = self;

        for node in nodes.iter_mut() {
            let Node {
                op,
                inputs,
                outputs,
            } = node;
            let mut ctx = NodeContext::new(tensors, inputs, outputs, arena, table, options);
            op.prepare(&mut ctx)?;
        }

        let mut live_bytes = 0;
        for (index, tensor) in tensors.iter_mut().enumerate() {
            let large = options
                .large_tensor_threshold
                .is_some_and(|threshold| tensor.byte_size() >= threshold);
            if tensor.kind() == AllocationKind::Static && large {
                tracing::debug!(index, bytes = tensor.byte_size(), "large tensor allocated dynamically");
                let previous = tensor.take_buffer();
                tensor.set_kind(AllocationKind::Dynamic)?;
                if let Some(buffer) = previous.and_then(|b| b.try_unwrap().ok()) {
                    arena.release(buffer);
                }
            }
            match tensor.kind() {
                AllocationKind::Constant => {}
                AllocationKind::Static => {
                    if !tensor.has_storage_for_shape() {
                        if let Some(stale) = tensor.take_buffer().and_then(|b| b.try_unwrap().ok()) {
                            arena.release(stale);
                        }
                        let buffer = arena.acquire(tensor.dtype(), tensor.shape().element_count())?;
                        tensor.set_buffer(SharedBuffer::new(buffer));
                    }
                    live_bytes += tensor.byte_size();
                }
                AllocationKind::Dynamic => {
                    if tensor.is_allocated() && !tensor.has_storage_for_shape() {
                        tensor.take_buffer();
                    }
                }
            }
        }
        arena.record_live(live_bytes);
        self.needs_allocation = false;
        tracing::debug!(
            subgraph = self.name().unwrap_or("<unnamed>"),
            live_bytes,
            pooled_bytes = self.arena.metrics().pooled_bytes,
            "allocated tensors"
        );
        Ok(())
    }

    /// Run every operator in declared order, allocating first if needed.
    pub(crate) fn invoke(
        &mut self,
        table: &mut SubgraphTable,
        options: &InterpreterOptions,
    ) -> Result<()> {
        if self.needs_allocation {
            self.allocate(table, options)?;
        }
        let Subgraph {
            tensors,
            nodes,
            arena,
            ..
        } = self;
        for node in nodes.iter_mut() {
            let Node {
                op,
                inputs,
                outputs,
            } = node;
            let mut ctx = NodeContext::new(tensors, inputs, outputs, arena, table, options);
            op.eval(&mut ctx)?;
        }
        Ok(())
    }

    /// Hand `value` to input slot `position`.
    ///
    /// A value of a new shape schedules an allocation pass before the next run.
    pub(crate) fn feed_input(
        &mut self,
        position: usize,
        value: &Tensor,
        policy: &TransferPolicy,
        access: Access,
    ) -> Result<()> {
        let slots = self.inputs().len();
        let tensor = self.input_tensor_mut(position).ok_or_else(|| {
            Error::shape_mismatch(format!("input {position} fed to a subgraph of {slots} inputs"))
        })?;
        let reshaped = tensor.shape() != value.shape() || tensor.is_deferred();
        let released = policy.transfer(value, tensor, access)?;
        if let Some(buffer) = released {
            self.arena.release(buffer);
        }
        if reshaped {
            self.needs_allocation = true;
        }
        Ok(())
    }

    /// Give input slot `position` the shape of the value it will receive, or
    /// mark it deferred when that shape is not known yet.
    pub(crate) fn shape_input(&mut self, position: usize, shape: Option<&Shape>) -> Result<()> {
        let index = *self
            .inputs()
            .get(position)
            .ok_or(Error::InvalidTensor { index: position })?;
        match shape {
            Some(shape) => self.resize_input_tensor(index, shape.dims()),
            None => {
                let tensor = &mut self.tensors[index];
                if !tensor.is_deferred() {
                    let was_static = tensor.kind() == AllocationKind::Static;
                    let released = tensor.take_buffer().and_then(|b| b.try_unwrap().ok());
                    tensor.mark_deferred()?;
                    if let (true, Some(buffer)) = (was_static, released) {
                        self.arena.release(buffer);
                    }
                    self.needs_allocation = true;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_subgraph_cannot_be_entered_again() {
        let mut table = SubgraphTable::new();
        table.push(Subgraph::new());
        let err = table
            .with(0, |_, table| table.with(0, |_, _| Ok(())))
            .unwrap_err();
        assert!(matches!(err, Error::SubgraphBusy { index: 0 }));
        // Checked back in despite the failure.
        assert!(table.get(0).is_ok());
        assert!(matches!(
            table.with(3, |_, _| Ok(())),
            Err(Error::InvalidSubgraph { index: 3 })
        ));
    }

    #[test]
    fn allocation_pass_assigns_arena_storage() {
        use crate::{ops::BinaryOpType, ops::Op, ElementType};

        let mut subgraph = Subgraph::new();
        let a = subgraph.add_tensor(Tensor::new(ElementType::Int32, [4]));
        let b = subgraph.add_tensor(Tensor::new(ElementType::Int32, Shape::scalar()));
        let one = subgraph.add_constant([1], vec![1i32]).unwrap();
        subgraph.set_inputs(vec![a]).unwrap();
        subgraph.set_outputs(vec![b]).unwrap();
        subgraph
            .add_node(Op::Binary(BinaryOpType::Add), vec![a, one], vec![b])
            .unwrap();

        let mut table = SubgraphTable::new();
        let options = InterpreterOptions::default();
        subgraph.allocate(&mut table, &options).unwrap();
        assert!(!subgraph.needs_allocation());
        assert_eq!(subgraph.tensor(b).unwrap().dims(), &[4]);
        assert!(subgraph.tensor(b).unwrap().is_allocated());
        assert_eq!(subgraph.arena_metrics().live_bytes, 32);

        subgraph
            .tensor_mut(a)
            .unwrap()
            .copy_from_slice(&[1, 2, 3, 4])
            .unwrap();
        subgraph.invoke(&mut table, &options).unwrap();
        assert_eq!(subgraph.tensor(b).unwrap().data::<i32>().unwrap(), &[2, 3, 4, 5]);

        // Large tensors are left for their first write.
        let mut options = InterpreterOptions::default();
        options.optimize_memory_for_large_tensors(16);
        subgraph.needs_allocation = true;
        subgraph.allocate(&mut table, &options).unwrap();
        let output = subgraph.tensor(b).unwrap();
        assert_eq!(output.kind(), AllocationKind::Dynamic);
        assert!(!output.is_allocated());
        assert_eq!(subgraph.arena_metrics().live_bytes, 0);
    }

    #[test]
    fn reads_before_writes_are_rejected() {
        use crate::{ops::BinaryOpType, ops::Op, ElementType};

        let mut subgraph = Subgraph::new();
        let t: Vec<usize> = (0..3)
            .map(|_| subgraph.add_tensor(Tensor::new(ElementType::Int32, [1])))
            .collect();
        subgraph.set_inputs(vec![t[0]]).unwrap();
        subgraph.set_outputs(vec![t[2]]).unwrap();
        subgraph
            .add_node(Op::Binary(BinaryOpType::Add), vec![t[0], t[1]], vec![t[2]])
            .unwrap();
        let err = subgraph
            .allocate(&mut SubgraphTable::new(), &InterpreterOptions::default())
            .unwrap_err();
        assert!(matches!(err.inner(), Error::Msg(_)));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        use crate::{ops::BinaryOpType, ops::Op, ElementType};

        let mut subgraph = Subgraph::new();
        let t: Vec<usize> = (0..3)
            .map(|_| subgraph.add_tensor(Tensor::new(ElementType::Int32, [1])))
            .collect();
        subgraph.set_inputs(vec![t[0], t[1]]).unwrap();
        subgraph.set_outputs(vec![t[2]]).unwrap();
        subgraph
            .add_node(Op::Binary(BinaryOpType::Div), vec![t[0], t[1]], vec![t[2]])
            .unwrap();

        let mut table = SubgraphTable::new();
        let options = InterpreterOptions::default();
        subgraph.allocate(&mut table, &options).unwrap();
        subgraph.tensor_mut(t[0]).unwrap().copy_from_slice(&[4]).unwrap();
        subgraph.tensor_mut(t[1]).unwrap().copy_from_slice(&[0]).unwrap();
        let err = subgraph.invoke(&mut table, &options).unwrap_err();
        assert!(matches!(err.inner(), Error::Msg(_)));
        assert!(err.to_string().contains("Div by zero"), "{err}");

        subgraph.tensor_mut(t[1]).unwrap().copy_from_slice(&[-2]).unwrap();
        subgraph.invoke(&mut table, &options).unwrap();
        assert_eq!(subgraph.tensor(t[2]).unwrap().data::<i32>().unwrap(), &[-2]);
    }
}
