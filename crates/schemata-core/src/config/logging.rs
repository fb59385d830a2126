use serde::{Deserialize, Serialize};

use crate::log::LogLevel;

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,
}
