use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LogFormat;

/// Initialize structured logging for the gateway.
///
/// The filter comes from `RUST_LOG` when set and defaults to `info`. JSON
/// output is one event per line for log shipping; pretty output is for
/// local development.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init()
            .wrap_err("failed to install JSON tracing subscriber")?,
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init()
            .wrap_err("failed to install pretty tracing subscriber")?,
    }

    tracing::info!(?format, "structured logging initialized");
    Ok(())
}

/// Flush pending events before process exit
pub fn shutdown_tracing() {
    tracing::info!("tracing shutdown complete");
}
