use crate::config::BACKTESTING_QUIET_LOGS_ENV;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn default_level() -> tracing_subscriber::filter::LevelFilter {
    // Quiet backtests drop per-iteration chatter; warnings still surface
    match std::env::var(BACKTESTING_QUIET_LOGS_ENV) {
        Ok(value) if matches!(value.to_lowercase().as_str(), "1" | "true" | "yes") => {
            tracing_subscriber::filter::LevelFilter::WARN
        }
        _ => tracing_subscriber::filter::LevelFilter::INFO,
    }
}

/// Initialise default non-JSON `Lumibot` logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(default_level().into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Initialise default JSON `Lumibot` logging.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(default_level().into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
