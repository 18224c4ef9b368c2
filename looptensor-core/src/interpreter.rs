use crate::{
    executor::SubgraphTable, memory::memory_usage, subgraph::Subgraph, Error,
    InterpreterOptions, Result, Tensor,
};

/// Index of the subgraph callers feed and read.
pub const PRIMARY_SUBGRAPH: usize = 0;

/// Owns every subgraph of a model and runs the primary one.
///
/// Subgraphs are addressed by index; index 0 is the primary subgraph and
/// always exists.
#[derive(Debug)]
pub struct Interpreter {
    subgraphs: SubgraphTable,
    options: InterpreterOptions,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_options(InterpreterOptions::default())
    }

    pub fn with_options(options: InterpreterOptions) -> Self {
        let mut subgraphs = SubgraphTable::new();
        subgraphs.push(Subgraph::new());
        Self { subgraphs, options }
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    /// Install new options. Every subgraph is allocated again before it next runs.
    pub fn apply_options(&mut self, options: &InterpreterOptions) -> Result<()> {
        self.options = options.clone();
        self.subgraphs.mark_for_allocation();
        tracing::debug!(?options, "applied interpreter options");
        Ok(())
    }

    /// Append `count` empty subgraphs and return the index of the first.
    pub fn add_subgraphs(&mut self, count: usize) -> usize {
        let first = self.subgraphs.len();
        for _ in 0..count {
            self.subgraphs.push(Subgraph::new());
        }
        first
    }

    pub fn subgraphs_size(&self) -> usize {
        self.subgraphs.len()
    }

    pub fn subgraph(&self, index: usize) -> Result<&Subgraph> {
        self.subgraphs.get(index)
    }

    pub fn subgraph_mut(&mut self, index: usize) -> Result<&mut Subgraph> {
        self.subgraphs.get_mut(index)
    }

    pub fn primary_subgraph(&self) -> &Subgraph {
        match self.subgraphs.get(PRIMARY_SUBGRAPH) {
            Ok(subgraph) => subgraph,
            Err(_) => unreachable!("the primary subgraph is only checked out while running"),
        }
    }

    pub fn primary_subgraph_mut(&mut self) -> &mut Subgraph {
        match self.subgraphs.get_mut(PRIMARY_SUBGRAPH) {
            Ok(subgraph) => subgraph,
            Err(_) => unreachable!("the primary subgraph is only checked out while running"),
        }
    }

    pub fn inputs(&self) -> &[usize] {
        self.primary_subgraph().inputs()
    }

    pub fn outputs(&self) -> &[usize] {
        self.primary_subgraph().outputs()
    }

    /// Tensor `index` of the primary subgraph.
    pub fn tensor(&self, index: usize) -> Result<&Tensor> {
        self.primary_subgraph()
            .tensor(index)
            .ok_or(Error::InvalidTensor { index })
    }

    pub fn tensor_mut(&mut self, index: usize) -> Result<&mut Tensor> {
        self.primary_subgraph_mut()
            .tensor_mut(index)
            .ok_or(Error::InvalidTensor { index })
    }

    pub fn resize_input_tensor(&mut self, index: usize, dims: &[usize]) -> Result<()> {
        self.primary_subgraph_mut().resize_input_tensor(index, dims)
    }

    /// Run the allocation pass of the primary subgraph, and through its
    /// control-flow operators, of every subgraph it calls.
    pub fn allocate_tensors(&mut self) -> Result<()> {
        self.subgraphs.check_acyclic()?;
        let before = memory_usage();
        let options = &self.options;
        self.subgraphs
            .with(PRIMARY_SUBGRAPH, |primary, table| primary.allocate(table, options))?;
        let after = memory_usage();
        tracing::debug!(
            rss_kb = after.current_rss_kb,
            peak_growth_kb = after.max_rss_kb.saturating_sub(before.max_rss_kb),
            "allocate_tensors"
        );
        Ok(())
    }

    /// Run the primary subgraph.
    ///
    /// On error no output should be considered valid, but the interpreter
    /// stays usable for further invocations.
    pub fn invoke(&mut self) -> Result<()> {
        if self.primary_subgraph().needs_allocation() {
            self.allocate_tensors()?;
        }
        let options = &self.options;
        self.subgraphs
            .with(PRIMARY_SUBGRAPH, |primary, table| primary.invoke(table, options))
    }
}
