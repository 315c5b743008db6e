//! Logging setup
//!
//! Libraries only emit `tracing` events; binaries and tests call
//! [`init_logging`] once to install a subscriber.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cadence_core::{CadenceError, CadenceResult};

/// Subscriber settings
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_filter: "info".into(),
            json: false,
            with_target: true,
        }
    }
}

/// Install a global `tracing` subscriber.
///
/// Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> CadenceResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| CadenceError::ConfigError(e.to_string()))?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(config.with_target))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(config.with_target))
            .with(filter)
            .try_init()
    };
    result.map_err(|e| CadenceError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig {
            default_filter: "cadence_runtime=debug".into(),
            ..LogConfig::default()
        };
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(CadenceError::ConfigError(_))
        ));
    }
}
