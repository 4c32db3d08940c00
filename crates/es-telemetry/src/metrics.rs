//! Prometheus metrics for the event store bus.
//!
//! All metrics follow the naming convention: `esbus_<area>_<metric>_<unit>`
//!
//! ## Labels
//!
//! - `kind`: `catch_up` or `persistent`
//! - `outcome`: `delivered`, `undeliverable`, `unhandled` or `failed`
//! - `stream`, `group`: only on subscription metrics, bounded by the configured subscriptions
//!
//! Publish counters carry no stream label since aggregates write to one stream each.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Events received from the store, by subscription kind and dispatch outcome
    pub static ref EVENTS_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("esbus_subscription_events_received_total", "Events received from the store"),
        &["kind", "outcome"]
    ).expect("metric creation failed");

    /// Positive acknowledgements sent on persistent subscriptions
    pub static ref EVENTS_ACKED: IntCounterVec = IntCounterVec::new(
        Opts::new("esbus_subscription_acks_total", "Persistent subscription acks"),
        &["stream", "group"]
    ).expect("metric creation failed");

    /// Negative acknowledgements sent on persistent subscriptions
    pub static ref EVENTS_NACKED: IntCounterVec = IntCounterVec::new(
        Opts::new("esbus_subscription_nacks_total", "Persistent subscription nacks"),
        &["stream", "group", "action"]
    ).expect("metric creation failed");

    /// Reconnect attempts for dropped persistent subscriptions
    pub static ref RECONNECT_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("esbus_subscription_reconnect_attempts_total", "Persistent subscription reconnect attempts"),
        &["stream", "group"]
    ).expect("metric creation failed");

    /// Subscriptions currently live
    pub static ref LIVE_SUBSCRIPTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("esbus_subscription_live", "Subscriptions with an open connection"),
        &["kind"]
    ).expect("metric creation failed");

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    /// Events appended to the store
    pub static ref EVENTS_PUBLISHED: IntCounter = IntCounter::with_opts(
        Opts::new("esbus_publish_events_total", "Events appended to the store"),
    ).expect("metric creation failed");

    /// Failed append calls
    pub static ref PUBLISH_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("esbus_publish_failures_total", "Failed append calls"),
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Calling it more than once is harmless.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` for any registration failure other than
/// the metric already being registered.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_RECEIVED.clone()),
        Box::new(EVENTS_ACKED.clone()),
        Box::new(EVENTS_NACKED.clone()),
        Box::new(RECONNECT_ATTEMPTS.clone()),
        Box::new(LIVE_SUBSCRIPTIONS.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
