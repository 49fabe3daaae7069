use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Background push metrics
	pub push_scheduled_total: IntCounter,
	pub push_dropped_total: IntCounter,
	pub push_succeeded_total: IntCounter,
	pub push_failed_total: IntCounterVec,
	pub push_retries_total: IntCounter,
	pub push_stale_total: IntCounter,
	pub push_queue_length: IntGauge,
	pub push_latency_ms: Histogram,
	pub remote_deletes_total: IntCounter,
	pub remote_delete_failures_total: IntCounter,

	// Batch job metrics, labelled by job ("push" / "pull") and entity type
	pub batch_runs_total: IntCounterVec,
	pub batch_records_total: IntCounterVec,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		let registry = Registry::new();

		let push_scheduled_total = IntCounter::with_opts(
			Opts::new("push_scheduled_total", "Background pushes queued after a local commit")
				.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_dropped_total = IntCounter::with_opts(
			Opts::new(
				"push_dropped_total",
				"Background pushes not queued because the queue was full or closed",
			)
			.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_succeeded_total = IntCounter::with_opts(
			Opts::new("push_succeeded_total", "Background pushes that reached the mirror")
				.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_failed_total = IntCounterVec::new(
			Opts::new("push_failed_total", "Background pushes that failed, by error kind")
				.namespace("masshealth_sync"),
			&["kind"],
		)
		.unwrap();

		let push_retries_total = IntCounter::with_opts(
			Opts::new(
				"push_retries_total",
				"Pushes re-queued after a backoff because a relation target was missing",
			)
			.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_stale_total = IntCounter::with_opts(
			Opts::new(
				"push_stale_total",
				"Pushes skipped because the mirror already held a newer version",
			)
			.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_queue_length = IntGauge::with_opts(
			Opts::new("push_queue_length", "Propagation jobs queued or running")
				.namespace("masshealth_sync"),
		)
		.unwrap();

		let push_latency_ms = Histogram::with_opts(
			HistogramOpts::new("push_latency_ms", "Background push latency in milliseconds")
				.namespace("masshealth_sync")
				.buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
		)
		.unwrap();

		let remote_deletes_total = IntCounter::with_opts(
			Opts::new("remote_deletes_total", "Mirror deletes applied").namespace("masshealth_sync"),
		)
		.unwrap();

		let remote_delete_failures_total = IntCounter::with_opts(
			Opts::new("remote_delete_failures_total", "Mirror deletes that failed")
				.namespace("masshealth_sync"),
		)
		.unwrap();

		let batch_runs_total = IntCounterVec::new(
			Opts::new("batch_runs_total", "Batch job runs, by job and outcome")
				.namespace("masshealth_sync"),
			&["job", "outcome"],
		)
		.unwrap();

		let batch_records_total = IntCounterVec::new(
			Opts::new(
				"batch_records_total",
				"Records processed by batch jobs, by job, entity type and result",
			)
			.namespace("masshealth_sync"),
			&["job", "entity", "result"],
		)
		.unwrap();

		// Register all metrics
		registry
			.register(Box::new(push_scheduled_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_dropped_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_succeeded_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_failed_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_retries_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_stale_total.clone()))
			.unwrap();
		registry
			.register(Box::new(push_queue_length.clone()))
			.unwrap();
		registry
			.register(Box::new(push_latency_ms.clone()))
			.unwrap();
		registry
			.register(Box::new(remote_deletes_total.clone()))
			.unwrap();
		registry
			.register(Box::new(remote_delete_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(batch_runs_total.clone()))
			.unwrap();
		registry
			.register(Box::new(batch_records_total.clone()))
			.unwrap();

		Self {
			registry,
			push_scheduled_total,
			push_dropped_total,
			push_succeeded_total,
			push_failed_total,
			push_retries_total,
			push_stale_total,
			push_queue_length,
			push_latency_ms,
			remote_deletes_total,
			remote_delete_failures_total,
			batch_runs_total,
			batch_records_total,
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize the metrics registry shared by the engine components
pub fn init_metrics() -> Arc<MetricsRegistry> {
	Arc::new(MetricsRegistry::new())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new();
		registry.push_scheduled_total.inc();
		let out = registry.encode();
		assert!(out.contains("masshealth_sync_push_scheduled_total 1"));
	}

	#[test]
	fn labelled_counters_encode() {
		let registry = super::MetricsRegistry::new();
		registry
			.push_failed_total
			.with_label_values(&["unresolved_dependency"])
			.inc();
		registry
			.batch_records_total
			.with_label_values(&["push", "Workout", "created"])
			.inc_by(3);
		let out = registry.encode();
		assert!(out.contains("kind=\"unresolved_dependency\""));
		assert!(out.contains("entity=\"Workout\""));
	}
}
