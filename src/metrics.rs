//! Prometheus metrics for the topology services.
//!
//! Metrics cover:
//! - Membership (view changes, members per role, local zone leadership)
//! - Synchronous messaging (outcomes, latency, pending requests, late responses)
//! - Delivery path drops (undecodable envelopes, unknown command types)
//! - Runtime synchronization outcomes and broadcasts
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "zonal" prefix to avoid
//! name collisions with other libraries using the default Prometheus registry.
//! Registration errors are handled gracefully: if a metric fails to register,
//! the unregistered metric is returned instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for topology metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("zonal".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Membership metrics
// =============================================================================

define_counter!(
    VIEW_CHANGES,
    "view_changes_total",
    "Total number of membership views installed"
);
define_gauge_vec!(
    VIEW_MEMBERS,
    "view_members",
    "Members in the current view by role",
    ["role"]
);
define_gauge!(
    ZONE_LEADER,
    "zone_leader",
    "1 when this node is the leader of its zone"
);

// =============================================================================
// Messaging metrics
// =============================================================================

define_gauge!(
    PENDING_REQUESTS,
    "pending_requests",
    "Synchronous requests awaiting a response"
);
define_counter_vec!(
    SYNC_SENDS,
    "sync_send_total",
    "Synchronous sends by outcome",
    ["outcome"]
);
define_histogram_vec!(
    SYNC_SEND_DURATION,
    "sync_send_duration_seconds",
    "Synchronous send round-trip duration in seconds",
    ["outcome"],
    [0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]
);
define_counter_vec!(
    DROPPED_ENVELOPES,
    "dropped_envelopes_total",
    "Envelopes dropped on the delivery path",
    ["reason"]
);
define_counter!(
    LATE_RESPONSES,
    "late_responses_total",
    "Responses that arrived after their request completed or timed out"
);
define_counter_vec!(
    BROADCASTS,
    "broadcasts_total",
    "One-way broadcasts by scope",
    ["scope"]
);

// =============================================================================
// Synchronization metrics
// =============================================================================

define_counter_vec!(
    RUNTIME_SYNCS,
    "runtime_sync_total",
    "Runtime synchronization runs by result",
    ["result"]
);

// =============================================================================
// Safe Registration
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric so they appear in the exposition
/// before first use. Idempotent.
pub fn init_metrics() {
    let _ = &*VIEW_CHANGES;
    let _ = &*VIEW_MEMBERS;
    let _ = &*ZONE_LEADER;
    let _ = &*PENDING_REQUESTS;
    let _ = &*SYNC_SENDS;
    let _ = &*SYNC_SEND_DURATION;
    let _ = &*DROPPED_ENVELOPES;
    let _ = &*LATE_RESPONSES;
    let _ = &*BROADCASTS;
    let _ = &*RUNTIME_SYNCS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// =============================================================================
// Recording Helpers
// =============================================================================

/// Record an installed view and its role breakdown.
pub fn record_view(controllers: usize, nodes: usize) {
    VIEW_CHANGES.inc();
    VIEW_MEMBERS
        .with_label_values(&["controller"])
        .set(controllers as i64);
    VIEW_MEMBERS.with_label_values(&["node"]).set(nodes as i64);
}

pub fn set_zone_leader(is_leader: bool) {
    ZONE_LEADER.set(i64::from(is_leader));
}

/// Record a completed synchronous send.
pub fn record_sync_send(outcome: &str, duration_secs: f64) {
    SYNC_SENDS.with_label_values(&[outcome]).inc();
    SYNC_SEND_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_dropped_envelope(reason: &str) {
    DROPPED_ENVELOPES.with_label_values(&[reason]).inc();
}

pub fn record_late_response() {
    LATE_RESPONSES.inc();
}

pub fn record_broadcast(scope: &str) {
    BROADCASTS.with_label_values(&[scope]).inc();
}

pub fn record_runtime_sync(result: &str) {
    RUNTIME_SYNCS.with_label_values(&[result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        let text = encode_metrics().unwrap();
        assert!(text.contains("zonal_view_changes_total"));
    }

    #[test]
    fn test_record_helpers_update_values() {
        let before = SYNC_SENDS.with_label_values(&["ok"]).get();
        record_sync_send("ok", 0.002);
        assert_eq!(SYNC_SENDS.with_label_values(&["ok"]).get(), before + 1);

        let views = VIEW_CHANGES.get();
        record_view(1, 3);
        assert!(VIEW_CHANGES.get() > views);

        let dropped = DROPPED_ENVELOPES.with_label_values(&["decode"]).get();
        record_dropped_envelope("decode");
        assert_eq!(
            DROPPED_ENVELOPES.with_label_values(&["decode"]).get(),
            dropped + 1
        );
    }

    #[test]
    fn test_encode_contains_prefix() {
        record_broadcast("domain");
        let text = encode_metrics().unwrap();
        assert!(text.contains("zonal_broadcasts_total"));
    }
}
