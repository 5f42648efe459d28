//! Structured logging for the matcher
//!
//! Subscriber setup, correlation ids that tie together every record emitted
//! by one comparison or merge, span wrappers for the major operations and a
//! lightweight timing collector.

pub mod config;
pub mod metrics;
pub mod spans;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use metrics::{global_metrics, Measurement, MetricsCollector, OperationStats, Timer};
pub use spans::{AlignmentSpan, CascadeSpan, MergeSpan};

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<Uuid>> = const { std::cell::RefCell::new(None) };
}

/// Keeps the background file writer alive; drop it at shutdown to flush.
#[must_use = "dropping the handle stops file logging"]
pub struct LoggingHandle {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides the configured levels.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location);
        if config.json_console {
            layers.push(console_layer.json().boxed());
        } else {
            layers.push(console_layer.boxed());
        }
    }

    let mut file_guard = None;
    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, "footprint.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false).json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::debug!(config = ?config, "Logging initialized");
    Ok(LoggingHandle {
        _file_guard: file_guard,
    })
}

pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|slot| *slot.borrow_mut() = Some(id));
}

pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(|slot| *slot.borrow())
}

pub fn clear_correlation_id() {
    CORRELATION_ID.with(|slot| *slot.borrow_mut() = None);
}

/// Correlation id for one comparison or merge.
///
/// Nested operations on the same thread share the outer id; the id is cleared
/// when the scope that created it is dropped.
pub struct CorrelationScope {
    id: Uuid,
    owned: bool,
}

impl CorrelationScope {
    pub fn enter() -> Self {
        match get_correlation_id() {
            Some(id) => Self { id, owned: false },
            None => {
                let id = Uuid::new_v4();
                set_correlation_id(id);
                Self { id, owned: true }
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        if self.owned {
            clear_correlation_id();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_correlation_scopes_nest() {
        clear_correlation_id();
        {
            let outer = CorrelationScope::enter();
            assert_eq!(get_correlation_id(), Some(outer.id()));
            {
                let inner = CorrelationScope::enter();
                assert_eq!(inner.id(), outer.id());
            }
            assert_eq!(get_correlation_id(), Some(outer.id()));
        }
        assert!(get_correlation_id().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_install() {
        let config = LoggingConfig {
            global_level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_logging_init_with_file_output() {
        let temp_dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            log_directory: Some(temp_dir.path().to_path_buf()),
            ..LoggingConfig::default()
        };

        // Another test may already own the global subscriber; either way no panic.
        let _ = init_logging(&config);
    }
}
