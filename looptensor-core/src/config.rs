use std::env;

use serde::{Deserialize, Serialize};

use crate::{transfer::TransferPolicy, Context, Result};

const LARGE_TENSOR_THRESHOLD_VAR: &str = "LOOPTENSOR_LARGE_TENSOR_THRESHOLD";
const MAX_WHILE_ITERATIONS_VAR: &str = "LOOPTENSOR_MAX_WHILE_ITERATIONS";

/// Interpreter-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    /// Byte size at or above which tensors are allocated dynamically and
    /// shared between loop iterations instead of copied. `None` disables sharing.
    pub large_tensor_threshold: Option<usize>,
    /// Upper bound on the body executions of a single while loop.
    pub max_while_iterations: Option<usize>,
}

impl InterpreterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from `LOOPTENSOR_LARGE_TENSOR_THRESHOLD` and
    /// `LOOPTENSOR_MAX_WHILE_ITERATIONS`. Unset variables keep the defaults.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(value) = env::var(LARGE_TENSOR_THRESHOLD_VAR) {
            options.large_tensor_threshold = Some(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {LARGE_TENSOR_THRESHOLD_VAR}={value}"))?,
            );
        }
        if let Ok(value) = env::var(MAX_WHILE_ITERATIONS_VAR) {
            options.max_while_iterations = Some(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {MAX_WHILE_ITERATIONS_VAR}={value}"))?,
            );
        }
        Ok(options)
    }

    /// Allocate tensors of at least `bytes` dynamically and share them across
    /// loop iterations.
    pub fn optimize_memory_for_large_tensors(&mut self, bytes: usize) -> &mut Self {
        self.large_tensor_threshold = Some(bytes);
        self
    }

    pub fn set_max_while_iterations(&mut self, limit: usize) -> &mut Self {
        self.max_while_iterations = Some(limit);
        self
    }

    pub fn transfer_policy(&self) -> TransferPolicy {
        TransferPolicy::new(self.large_tensor_threshold)
    }
}
