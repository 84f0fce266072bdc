use crate::config::Module;
use serde::{Deserialize, Serialize};

/// Everything one CLI invocation needs, resolved from flags and the modules file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub target: String,
    pub module_name: String,
    pub module: Module,
    pub log_level: Option<String>,
}
