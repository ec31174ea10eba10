//! Metrics definitions for the floor controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `floor_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label is bounded by an enum in this crate:
//! - `outcome`: acquire request outcomes (5 values)
//! - `reason`: acquire resolution reasons (2 values)
//! - `state`: lock states (4 values)
//! - `operation`: transport operations (5 values)

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its handle.
///
/// Must be called before any metric is recorded. Acquire latency buckets
/// cover the quorum fast path (tens of milliseconds) up to the fallback
/// timeout.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("floor_acquire".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 1.500, 2.000, 5.000],
        )
        .map_err(|e| format!("Failed to set acquire duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record a local acquire request.
///
/// Metric: `floor_acquire_requests_total`
/// Labels: `outcome` (started, lease_held, already_active, fenced, transport_unavailable)
pub fn record_acquire_request(outcome: &'static str) {
    counter!("floor_acquire_requests_total", "outcome" => outcome).increment(1);
}

/// Record how an acquire attempt resolved and how long it took.
///
/// Metrics: `floor_acquire_resolved_total`, `floor_acquire_duration_seconds`
/// Labels: `reason` (quorum, timeout)
pub fn record_acquire_resolved(reason: &'static str, duration: Duration) {
    counter!("floor_acquire_resolved_total", "reason" => reason).increment(1);
    histogram!("floor_acquire_duration_seconds", "reason" => reason)
        .record(duration.as_secs_f64());
}

/// Record a lock state transition.
///
/// Metric: `floor_state_transitions_total`
/// Labels: `state` (target state)
pub fn record_state_transition(state: &'static str) {
    counter!("floor_state_transitions_total", "state" => state).increment(1);
}

/// Record a takeover of an expired lease.
///
/// Metric: `floor_stale_lock_takeovers_total`
pub fn record_stale_lock_takeover() {
    counter!("floor_stale_lock_takeovers_total").increment(1);
}

/// Record losing a fenced lease write.
///
/// Metric: `floor_fenced_out_total`
/// Labels: `phase` (acquire, refresh)
pub fn record_fenced_out(phase: &'static str) {
    counter!("floor_fenced_out_total", "phase" => phase).increment(1);
}

/// Record a failed transport call.
///
/// Metric: `floor_transport_errors_total`
/// Labels: `operation` (publish, read_metadata, write_lease, delete_lease, encode)
pub fn record_transport_error(operation: &'static str) {
    counter!("floor_transport_errors_total", "operation" => operation).increment(1);
}

/// Record an inbound signal that could not be decoded.
///
/// Metric: `floor_malformed_signals_total`
pub fn record_malformed_signal() {
    counter!("floor_malformed_signals_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_metrics_are_recorded_with_bounded_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_acquire_request("started");
            record_acquire_request("lease_held");
            record_acquire_resolved("quorum", Duration::from_millis(40));
            record_acquire_resolved("timeout", Duration::from_millis(1500));
            record_state_transition("locked");
            record_stale_lock_takeover();
            record_fenced_out("refresh");
            record_transport_error("publish");
            record_malformed_signal();
            record_malformed_signal();
        });

        let metrics = snapshotter.snapshot().into_vec();

        let counter_value = |name: &str, label: Option<(&str, &str)>| {
            metrics
                .iter()
                .find(|(key, _, _, _)| {
                    key.kind() == MetricKind::Counter
                        && key.key().name() == name
                        && label.map_or(true, |(k, v)| {
                            key.key().labels().any(|l| l.key() == k && l.value() == v)
                        })
                })
                .map(|(_, _, _, value)| value.clone())
        };

        assert_eq!(
            counter_value("floor_acquire_requests_total", Some(("outcome", "started"))),
            Some(&DebugValue::Counter(1))
        );
        assert_eq!(
            counter_value("floor_acquire_resolved_total", Some(("reason", "timeout"))),
            Some(&DebugValue::Counter(1))
        );
        assert_eq!(
            counter_value("floor_malformed_signals_total", None),
            Some(&DebugValue::Counter(2))
        );
        assert_eq!(
            counter_value("floor_stale_lock_takeovers_total", None),
            Some(&DebugValue::Counter(1))
        );

        let histogram_count = metrics
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == "floor_acquire_duration_seconds")
            .count();
        assert_eq!(histogram_count, 2);
    }
}
