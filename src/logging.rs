//! Logger setup for binaries and tests.

use serde::{Deserialize, Serialize};
use std::sync::Once;

static INIT: Once = Once::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter directives. `RUST_LOG` wins when set.
    pub filter: String,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            timestamps: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// Installs the global logger. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.filter));
        if !config.timestamps {
            builder.format_timestamp(None);
        }
        if builder.try_init().is_err() {
            log::debug!("Logger already installed elsewhere");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default().with_filter("warn");
        init_logging(&config);
        init_logging(&config);
        log::warn!("logging initialized twice without panicking");
    }
}
