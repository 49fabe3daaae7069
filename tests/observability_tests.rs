use masshealth_sync::observability::{MetricsRegistry, init_metrics};

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_registry_creation() {
	let registry = MetricsRegistry::new();
	let output = registry.encode();

	// Unlabelled metrics are present from the start
	assert!(output.contains("masshealth_sync_push_scheduled_total"));
	assert!(output.contains("masshealth_sync_push_dropped_total"));
	assert!(output.contains("masshealth_sync_push_queue_length"));
	assert!(output.contains("masshealth_sync_push_latency_ms"));
	assert!(output.contains("masshealth_sync_remote_deletes_total"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_increment() {
	let registry = MetricsRegistry::new();

	registry.push_scheduled_total.inc();
	registry.push_succeeded_total.inc_by(5);
	registry.push_retries_total.inc_by(2);

	let output = registry.encode();

	assert!(output.contains("masshealth_sync_push_scheduled_total 1"));
	assert!(output.contains("masshealth_sync_push_succeeded_total 5"));
	assert!(output.contains("masshealth_sync_push_retries_total 2"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_gauge_operations() {
	let registry = MetricsRegistry::new();

	registry.push_queue_length.set(50);
	let output = registry.encode();
	assert!(output.contains("masshealth_sync_push_queue_length 50"));

	registry.push_queue_length.inc();
	registry.push_queue_length.dec();
	let output2 = registry.encode();
	assert!(output2.contains("masshealth_sync_push_queue_length 50"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_batch_counters_are_labelled() {
	let registry = init_metrics();
	registry
		.batch_runs_total
		.with_label_values(&["pull", "ok"])
		.inc();
	registry
		.batch_records_total
		.with_label_values(&["pull", "Routine", "skipped"])
		.inc_by(4);

	let output = registry.encode();
	assert!(output.contains("masshealth_sync_batch_runs_total{job=\"pull\",outcome=\"ok\"} 1"));
	assert!(output.contains("result=\"skipped\""));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_histogram_observations() {
	let registry = MetricsRegistry::new();
	registry.push_latency_ms.observe(3.0);
	registry.push_latency_ms.observe(700.0);

	let output = registry.encode();
	assert!(output.contains("masshealth_sync_push_latency_ms_count 2"));
	assert!(output.contains("masshealth_sync_push_latency_ms_bucket{le=\"5\"} 1"));
}
