//! # EventStore Bus Telemetry
//!
//! Logging and metrics for the subscription manager.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use es_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ES_SERVICE_NAME` | `eventstore-bus` | Service name on the root span |
//! | `ES_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `ES_JSON_LOGS` | `false` | JSON output |
//! | `ES_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{
    encode_metrics, register_metrics, EVENTS_ACKED, EVENTS_NACKED, EVENTS_PUBLISHED,
    EVENTS_RECEIVED, LIVE_SUBSCRIPTIONS, PUBLISH_FAILURES, RECONNECT_ATTEMPTS,
};

use thiserror::Error;

/// Why logging or metrics could not be set up.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Log subscriber not installed: {0}")]
    LoggingInit(String),

    #[error("Metric registration failed: {0}")]
    MetricsInit(String),

    #[error("Bad telemetry setting: {0}")]
    Config(String),
}

/// Register metrics, then install the global log subscriber.
///
/// # Errors
///
/// Any [`TelemetryError`] from the two steps.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );
    Ok(())
}
