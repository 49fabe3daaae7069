use std::sync::Arc;

use log::{info, warn};

use super::{SyncRunReport, SyncSwitch, TypeReport, transform};
use crate::model::{EntityRegistry, RecordFilter, SyncableRecord};
use crate::observability::MetricsRegistry;
use crate::store::{EntityStore, UpsertOutcome};

/// Pushes unsynced local records to the mirror in dependency order.
///
/// Types are walked in registry order so that relation targets reach the
/// mirror before the records that point at them.
pub struct BatchSyncer {
	local: Arc<dyn EntityStore>,
	mirror: Arc<dyn EntityStore>,
	registry: Arc<EntityRegistry>,
	switch: SyncSwitch,
	batch_size: usize,
	metrics: Arc<MetricsRegistry>,
}

impl BatchSyncer {
	pub fn new(
		local: Arc<dyn EntityStore>,
		mirror: Arc<dyn EntityStore>,
		registry: Arc<EntityRegistry>,
		switch: SyncSwitch,
		batch_size: usize,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			local,
			mirror,
			registry,
			switch,
			batch_size,
			metrics,
		}
	}

	/// Run once. `full` selects every record instead of pending and failed
	/// ones. Per-record and per-type failures are recorded in the report and
	/// never abort the run.
	#[tracing::instrument(skip(self))]
	pub async fn run(&self, full: bool) -> SyncRunReport {
		let mut report = SyncRunReport::new("push", full);
		if !self.switch.is_enabled() {
			info!("sync disabled, skipping push");
			report.skipped = true;
			self.metrics
				.batch_runs_total
				.with_label_values(&["push", "skipped"])
				.inc();
			return report;
		}

		let filter = if full {
			RecordFilter::all()
		} else {
			RecordFilter::unsynced()
		}
		.limit(self.batch_size);

		for descriptor in self.registry.iter() {
			if !self.switch.is_enabled() {
				info!("sync disabled mid-run, stopping before {}", descriptor.entity);
				report.skipped = true;
				break;
			}

			let mut tr = TypeReport::new(&descriptor.entity);
			match self.local.query(&descriptor.entity, &filter).await {
				Ok(records) => {
					tr.selected = records.len();
					for record in &records {
						self.push_one(record, &mut tr).await;
					}
				}
				Err(e) => {
					warn!("cannot select {} records for push: {}", descriptor.entity, e);
					tr.error = Some(e.to_string());
				}
			}

			if tr.selected > 0 || tr.error.is_some() {
				info!(
					"push {}: {} selected, {} created, {} updated, {} skipped, {} failed",
					tr.entity, tr.selected, tr.created, tr.updated, tr.skipped, tr.failed
				);
			}
			report.types.push(tr);
		}

		let outcome = if report.total_failed() > 0 || report.types.iter().any(|t| t.error.is_some()) {
			"partial"
		} else {
			"ok"
		};
		self.metrics
			.batch_runs_total
			.with_label_values(&["push", outcome])
			.inc();
		report
	}

	async fn push_one(&self, record: &SyncableRecord, tr: &mut TypeReport) {
		let result = transform::push_to_mirror(self.mirror.as_ref(), &self.registry, record).await;
		if let Err(e) = transform::settle(self.local.as_ref(), record, &result).await {
			warn!(
				"cannot record sync status of {} {}: {}",
				record.entity, record.id, e
			);
		}

		let label = match &result {
			Ok(UpsertOutcome::Created) => {
				tr.created += 1;
				"created"
			}
			Ok(UpsertOutcome::Updated) => {
				tr.updated += 1;
				"updated"
			}
			Ok(UpsertOutcome::Stale) => {
				tr.skipped += 1;
				"stale"
			}
			Err(e) => {
				warn!("push of {} {} failed: {}", record.entity, record.id, e);
				tr.failed += 1;
				"failed"
			}
		};
		self.metrics
			.batch_records_total
			.with_label_values(&["push", record.entity.as_str(), label])
			.inc();
	}
}
