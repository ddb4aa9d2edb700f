//! Structured logging setup
//!
//! Installs `tracing-subscriber` formatters driven by [`LoggingConfig`]: one
//! for the console and one for the log file, each present when enabled.
//! `RUST_LOG` takes precedence over the configured level when set.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Build the filter for `config`, honouring `RUST_LOG` when present
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

/// One formatting layer per enabled output
fn output_layers(config: &LoggingConfig) -> Result<Vec<OutputLayer>> {
    let mut layers = Vec::new();

    if config.log_to_console {
        let console = fmt::layer().with_target(true);
        layers.push(if config.json_format {
            console.json().boxed()
        } else {
            console.boxed()
        });
    }

    if let (true, Some(path)) = (config.log_to_file, config.log_file_path.as_deref()) {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;
        let file = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        layers.push(if config.json_format {
            file.json().boxed()
        } else {
            file.boxed()
        });
    }

    Ok(layers)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ProtocolError::ConfigError(errors.join("; ")));
    }

    tracing_subscriber::registry()
        .with(output_layers(config)?)
        .with(env_filter(config))
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_invalid_config_is_rejected_before_install() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_file_output_keeps_console() {
        let path = std::env::temp_dir().join(format!("chat-relay-{}.log", std::process::id()));
        let config = LoggingConfig {
            log_to_console: true,
            log_to_file: true,
            log_file_path: Some(path.to_string_lossy().into_owned()),
            ..LoggingConfig::default()
        };

        let layers = output_layers(&config).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_console_only_has_one_output() {
        let layers = output_layers(&LoggingConfig::default()).unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn test_filter_uses_configured_level() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "debug");
        }
    }
}
