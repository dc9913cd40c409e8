use std::time::Duration;

use serde::Deserialize;

/// Resource caps applied to every evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Wall-clock budget per validator, in milliseconds.
    pub deadline_ms: u64,
    /// Interpreter operation cap; 0 leaves only the deadline.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            deadline_ms: 1000,
            max_operations: 0,
            max_call_levels: 16,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

impl SandboxLimits {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
