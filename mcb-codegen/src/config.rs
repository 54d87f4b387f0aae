//! Backend configuration

use serde::{Deserialize, Serialize};

/// Knobs for a compilation session. Missing fields take their defaults
/// when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Function that never saves or restores callee-saved registers, since
    /// nothing it returns to relies on them. `None` preserves them in every
    /// function.
    pub entry_function: Option<String>,
    /// Log each function's allocation at info level
    pub trace_allocation: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            entry_function: Some("main".to_string()),
            trace_allocation: false,
        }
    }
}

impl BackendConfig {
    pub fn preserves_callee_saved(&self, function: &str) -> bool {
        self.entry_function.as_deref() != Some(function)
    }
}
