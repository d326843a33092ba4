//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence; otherwise the configured `log_level` applies
//! to this crate and `warn` to everything else.

use crate::config::{ApplicationConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,stage_focus={}", level)))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn try_init(config: &ApplicationConfig) -> anyhow::Result<()> {
    let filter = default_filter(&config.log_level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Install the global subscriber, ignoring a second call.
pub fn init(config: &ApplicationConfig) {
    if let Err(e) = try_init(config) {
        tracing::debug!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = ApplicationConfig::default();
        init(&config);
        assert!(try_init(&config).is_err());
    }
}
