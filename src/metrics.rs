//! Optional `metrics`-crate wiring for the Orchestrator's counters.
//!
//! The Orchestrator tracks its own counters internally (see
//! [`crate::StatsSnapshot`]) regardless of this feature; this module only
//! mirrors them into the global `metrics` recorder and, behind the
//! `prometheus` feature, exposes a Prometheus exporter for them.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
#[cfg(feature = "prometheus")] use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_LOOKUPS_TOTAL: &str = "rep_orchestrator_lookups_total";
const METRIC_CACHE_HITS_TOTAL: &str = "rep_orchestrator_cache_hits_total";
const METRIC_QUEUED_TOTAL: &str = "rep_orchestrator_queued_total";
const METRIC_KEY_ROTATIONS_TOTAL: &str = "rep_orchestrator_key_rotations_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a completed lookup, tagged with its terminal status.
pub fn record_lookup(status: &'static str) {
	metrics::counter!(METRIC_LOOKUPS_TOTAL, status_labels(status).iter()).increment(1);
}

/// Record a cache hit.
pub fn record_cache_hit() {
	metrics::counter!(METRIC_CACHE_HITS_TOTAL).increment(1);
}

/// Record a request being queued for later draining.
pub fn record_queued() {
	metrics::counter!(METRIC_QUEUED_TOTAL).increment(1);
}

/// Record a credential rotation within the Scheduler's attempt loop.
pub fn record_key_rotation() {
	metrics::counter!(METRIC_KEY_ROTATIONS_TOTAL).increment(1);
}

fn status_labels(status: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("status", status));

	labels
}

/// Metric sample surfaced in [`crate::StatsSnapshot`] for quick introspection.
#[derive(Clone, Debug)]
pub struct StatMetric {
	/// Metric name following the `rep_orchestrator_*` naming scheme.
	pub name: String,
	/// Numeric value captured for the metric.
	pub value: f64,
}
impl StatMetric {
	/// Build a named sample.
	pub fn new(name: impl Into<String>, value: f64) -> Self {
		Self { name: name.into(), value }
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, labels: &[(&str, &str)]) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels.into_iter().zip(expected_sorted).all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_lookups_and_cache_hits() {
		let snapshot = capture_metrics(|| {
			record_lookup("served_live");
			record_lookup("served_from_cache");
			record_cache_hit();
		});

		assert_eq!(
			counter_value(&snapshot, "rep_orchestrator_lookups_total", &[("status", "served_live")]),
			1
		);
		assert_eq!(counter_value(&snapshot, "rep_orchestrator_cache_hits_total", &[]), 1);
	}

	#[test]
	fn records_queue_and_rotation_counters() {
		let snapshot = capture_metrics(|| {
			record_queued();
			record_key_rotation();
			record_key_rotation();
		});

		assert_eq!(counter_value(&snapshot, "rep_orchestrator_queued_total", &[]), 1);
		assert_eq!(counter_value(&snapshot, "rep_orchestrator_key_rotations_total", &[]), 2);
	}
}
