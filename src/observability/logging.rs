//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber. Components of this crate
//! only emit events through the `tracing` macros with structured fields
//! (`endpoint = %endpoint`, `resolver = "dns"`), so a host application that
//! already configured its own subscriber does not need to call this.

use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;
use crate::core::error::{LbResult, LoadBalancerError};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(format: &str) -> LbResult<Self> {
        match format.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(LoadBalancerError::config(format!("Invalid log format: {}", other))),
        }
    }
}

/// Parse a level name, falling back to INFO for unknown names
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` directives are honoured on top of the configured level. A
/// subscriber that is already installed is left in place.
pub fn init_logging(config: &LoggingConfig) -> LbResult<()> {
    let level = parse_level(&config.level);
    let format = LogFormat::parse(&config.format)?;

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let result = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %level, format = ?format, "Structured logging initialized");
    Ok(())
}
