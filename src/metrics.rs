//! Prometheus metrics collection for evchan.
//!
//! Provides observability via Prometheus metrics exposed on an HTTP endpoint.
//!
//! - `evchan_notifications_total{kind}` - Notifications dispatched by kind
//! - `evchan_handler_duration_seconds{kind}` - Handler latency by kind
//! - `evchan_handler_errors_total{code}` - Handler failures by error code
//! - `evchan_reconcile_total{outcome}` - Reconciliation passes by outcome
//! - `evchan_provision_rollbacks_total` - Provisioning attempts rolled back
//! - `evchan_platform_requests_total{outcome}` - REST calls by outcome
//! - `evchan_in_flight_handlers` - Handler tasks currently running

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Notifications dispatched by kind.
pub static NOTIFICATIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Handler failures by error code.
pub static HANDLER_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Reconciliation passes by outcome (`ok`, `skipped`, `error`).
pub static RECONCILE: OnceLock<IntCounterVec> = OnceLock::new();

/// Provisioning attempts whose side effects were rolled back.
pub static PROVISION_ROLLBACKS: OnceLock<IntCounter> = OnceLock::new();

/// REST requests by outcome (`ok`, `not_found`, `rate_limited`, ...).
pub static PLATFORM_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

pub static IN_FLIGHT_HANDLERS: OnceLock<IntGauge> = OnceLock::new();

pub static HANDLER_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(NOTIFICATIONS, IntCounterVec::new(Opts::new("evchan_notifications_total", "Notifications dispatched by kind"), &["kind"]));
    register!(HANDLER_ERRORS, IntCounterVec::new(Opts::new("evchan_handler_errors_total", "Handler failures by error code"), &["code"]));
    register!(RECONCILE, IntCounterVec::new(Opts::new("evchan_reconcile_total", "Reconciliation passes by outcome"), &["outcome"]));
    register!(PROVISION_ROLLBACKS, IntCounter::new("evchan_provision_rollbacks_total", "Provisioning attempts rolled back"));
    register!(PLATFORM_REQUESTS, IntCounterVec::new(Opts::new("evchan_platform_requests_total", "Platform REST requests by outcome"), &["outcome"]));
    register!(IN_FLIGHT_HANDLERS, IntGauge::new("evchan_in_flight_handlers", "Handler tasks currently running"));
    register!(HANDLER_LATENCY, HistogramVec::new(
        HistogramOpts::new("evchan_handler_duration_seconds", "Handler latency by notification kind")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["kind"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helpers. Every recorder is a no-op until `init` has run, so services can be
// exercised in tests without a registry.
// ============================================================================

fn inc_label(metric: &OnceLock<IntCounterVec>, label: &str) {
    if let Some(c) = metric.get() {
        c.with_label_values(&[label]).inc();
    }
}

#[inline]
pub fn record_notification(kind: &str) {
    inc_label(&NOTIFICATIONS, kind);
}

#[inline]
pub fn record_handler_error(code: &str) {
    inc_label(&HANDLER_ERRORS, code);
}

#[inline]
pub fn record_reconcile(outcome: &str) {
    inc_label(&RECONCILE, outcome);
}

#[inline]
pub fn record_platform_request(outcome: &str) {
    inc_label(&PLATFORM_REQUESTS, outcome);
}

#[inline]
pub fn record_rollback() {
    if let Some(c) = PROVISION_ROLLBACKS.get() {
        c.inc();
    }
}

/// Record a finished handler with latency.
#[inline]
pub fn record_handler(kind: &str, duration_secs: f64) {
    if let Some(h) = HANDLER_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}

#[inline]
pub fn handler_started() {
    if let Some(g) = IN_FLIGHT_HANDLERS.get() {
        g.inc();
    }
}

#[inline]
pub fn handler_finished() {
    if let Some(g) = IN_FLIGHT_HANDLERS.get() {
        g.dec();
    }
}
