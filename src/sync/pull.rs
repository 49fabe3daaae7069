use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::{SyncRunReport, SyncSwitch, TypeReport};
use crate::error::{SyncError, SyncResult};
use crate::model::{EntityDescriptor, EntityRegistry, RecordFilter, SyncState, SyncableRecord};
use crate::observability::MetricsRegistry;
use crate::store::{EntityStore, UpdateMode};

/// Copies mirror records into the local store. An operator recovery tool,
/// never triggered by domain writes.
pub struct MirrorPuller {
	local: Arc<dyn EntityStore>,
	mirror: Arc<dyn EntityStore>,
	registry: Arc<EntityRegistry>,
	switch: SyncSwitch,
	batch_size: usize,
	metrics: Arc<MetricsRegistry>,
}

enum Pulled {
	Created,
	Updated,
	Skipped,
}

impl MirrorPuller {
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

	/// Pull every registered type, or only `only`.
	///
	/// Without `full`, a local row with a newer version than the mirror's (or
	/// the same version and already `synced`) is left alone. With `full` the
	/// mirror copy always wins. While sync is disabled the mirror is not read
	/// and the report comes back marked `skipped`.
	#[tracing::instrument(skip(self))]
	pub async fn run(&self, full: bool, only: Option<&str>) -> SyncResult<SyncRunReport> {
		let selected: Vec<&EntityDescriptor> = match only {
			Some(name) => vec![
				self.registry
					.get(name)
					.ok_or_else(|| SyncError::UnknownEntityType(name.to_string()))?,
			],
			None => self.registry.iter().collect(),
		};

		let mut report = SyncRunReport::new("pull", full);
		if !self.switch.is_enabled() {
			info!("sync disabled, skipping pull");
			report.skipped = true;
			self.metrics
				.batch_runs_total
				.with_label_values(&["pull", "skipped"])
				.inc();
			return Ok(report);
		}
		let filter = RecordFilter::all().limit(self.batch_size);

		for descriptor in selected {
			if !self.switch.is_enabled() {
				info!("sync disabled mid-run, stopping before {}", descriptor.entity);
				report.skipped = true;
				break;
			}
			let mut tr = TypeReport::new(&descriptor.entity);
			match self.mirror.query(&descriptor.entity, &filter).await {
				Ok(records) => {
					tr.selected = records.len();
					for record in records {
						let label = match self.pull_one(record, full).await {
							Ok(Pulled::Created) => {
								tr.created += 1;
								"created"
							}
							Ok(Pulled::Updated) => {
								tr.updated += 1;
								"updated"
							}
							Ok(Pulled::Skipped) => {
								tr.skipped += 1;
								"skipped"
							}
							Err(e) => {
								warn!("pull of a {} record failed: {}", descriptor.entity, e);
								tr.failed += 1;
								"failed"
							}
						};
						self.metrics
							.batch_records_total
							.with_label_values(&["pull", descriptor.entity.as_str(), label])
							.inc();
					}
				}
				Err(e) => {
					warn!("cannot read {} from the mirror: {}", descriptor.entity, e);
					tr.error = Some(e.to_string());
				}
			}

			info!(
				"pull {}: {} read, {} created, {} updated, {} skipped, {} failed",
				tr.entity, tr.selected, tr.created, tr.updated, tr.skipped, tr.failed
			);
			report.types.push(tr);
		}

		let outcome = if report.total_failed() > 0 || report.types.iter().any(|t| t.error.is_some()) {
			"partial"
		} else {
			"ok"
		};
		self.metrics
			.batch_runs_total
			.with_label_values(&["pull", outcome])
			.inc();
		Ok(report)
	}

	async fn pull_one(&self, mut record: SyncableRecord, full: bool) -> SyncResult<Pulled> {
		record.sync = SyncState::synced(Utc::now());

		let existing = match self.local.get(&record.entity, record.id).await {
			Ok(r) => Some(r),
			Err(SyncError::NotFound { .. }) => None,
			Err(e) => return Err(e),
		};

		let Some(existing) = existing else {
			return match self.local.insert(&record).await {
				Ok(()) => Ok(Pulled::Created),
				// Created locally since the read; treat it as an existing row.
				Err(SyncError::AlreadyExists { .. }) => self.overwrite(&record).await,
				Err(e) => Err(e),
			};
		};

		if !full
			&& (existing.version > record.version
				|| (existing.version == record.version && existing.sync.is_synced()))
		{
			debug!(
				"local {} {} is at version {} (mirror {}), skipping",
				record.entity, record.id, existing.version, record.version
			);
			return Ok(Pulled::Skipped);
		}
		self.overwrite(&record).await
	}

	async fn overwrite(&self, record: &SyncableRecord) -> SyncResult<Pulled> {
		self.local.update(record, UpdateMode::Overwrite).await?;
		Ok(Pulled::Updated)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::model::{EntityType, SyncStatus};
	use crate::store::MemoryStore;

	fn puller(local: Arc<MemoryStore>, mirror: Arc<MemoryStore>) -> MirrorPuller {
		puller_with(local, mirror, SyncSwitch::new(true))
	}

	fn puller_with(local: Arc<MemoryStore>, mirror: Arc<MemoryStore>, switch: SyncSwitch) -> MirrorPuller {
		MirrorPuller::new(
			local,
			mirror,
			Arc::new(EntityRegistry::masshealth()),
			switch,
			100,
			Arc::new(MetricsRegistry::new()),
		)
	}

	#[tokio::test]
	async fn pulls_missing_records_as_synced() {
		let local = Arc::new(MemoryStore::local());
		let mirror = Arc::new(MemoryStore::mirror());
		let mut r = SyncableRecord::new("MuscleGroup").field("name", "Core");
		r.version = 7;
		mirror.insert(&r).await.unwrap();

		let report = puller(local.clone(), mirror).run(false, None).await.unwrap();
		assert_eq!(report.entity("MuscleGroup").unwrap().created, 1);
		let row = local.get(&r.entity, r.id).await.unwrap();
		assert_eq!(row.status(), SyncStatus::Synced);
		assert_eq!(row.version, 7);
		assert!(row.same_content(&r));
	}

	#[tokio::test]
	async fn newer_local_row_survives_unless_full() {
		let local = Arc::new(MemoryStore::local());
		let mirror = Arc::new(MemoryStore::mirror());
		let mut remote = SyncableRecord::new("Routine").field("name", "old");
		remote.version = 1;
		mirror.insert(&remote).await.unwrap();
		let mut newer = remote.clone().field("name", "new");
		newer.version = 2;
		local.insert(&newer).await.unwrap();

		let p = puller(local.clone(), mirror);
		let report = p.run(false, None).await.unwrap();
		assert_eq!(report.entity("Routine").unwrap().skipped, 1);
		assert_eq!(local.get(&newer.entity, newer.id).await.unwrap().fields["name"], "new");

		let report = p.run(true, Some("Routine")).await.unwrap();
		assert_eq!(report.types.len(), 1);
		assert_eq!(report.entity("Routine").unwrap().updated, 1);
		let row = local.get(&newer.entity, newer.id).await.unwrap();
		assert_eq!(row.fields["name"], "old");
		assert_eq!(row.status(), SyncStatus::Synced);
	}

	#[tokio::test]
	async fn disabled_switch_leaves_mirror_unread() {
		let local = Arc::new(MemoryStore::local());
		let mirror = Arc::new(MemoryStore::mirror());
		let r = SyncableRecord::new("FitnessGoal").field("target", 10);
		mirror.insert(&r).await.unwrap();
		mirror.clear_operations().await;

		let report = puller_with(local.clone(), mirror.clone(), SyncSwitch::new(false))
			.run(true, None)
			.await
			.unwrap();
		assert!(report.skipped);
		assert!(report.types.is_empty());
		assert!(mirror.operations().await.is_empty());
		assert!(!local.exists(&r.entity, r.id).await.unwrap());
	}

	#[tokio::test]
	async fn full_pull_drops_local_only_fields() {
		let local = Arc::new(MemoryStore::local());
		let mirror = Arc::new(MemoryStore::mirror());
		let mut remote = SyncableRecord::new("Challenge").field("title", "Plank");
		remote.version = 4;
		mirror.insert(&remote).await.unwrap();
		let mut diverged = remote.clone().field("notes", "local only");
		diverged.version = 5;
		local.insert(&diverged).await.unwrap();

		puller(local.clone(), mirror).run(true, Some("Challenge")).await.unwrap();
		let row = local.get(&remote.entity, remote.id).await.unwrap();
		assert!(row.same_content(&remote));
		assert!(!row.fields.contains_key("notes"));
		assert_eq!(row.version, 4);
	}

	#[tokio::test]
	async fn unknown_type_filter_is_an_error() {
		let p = puller(Arc::new(MemoryStore::local()), Arc::new(MemoryStore::mirror()));
		let err = p.run(false, Some("Nope")).await.unwrap_err();
		assert!(matches!(err, SyncError::UnknownEntityType(ref t) if t == "Nope"));
	}

	#[tokio::test]
	async fn unreachable_mirror_is_recorded_per_type() {
		let local = Arc::new(MemoryStore::local());
		let mirror = Arc::new(MemoryStore::mirror());
		mirror.set_available(false);
		let report = puller(local.clone(), mirror).run(false, Some("Challenge")).await.unwrap();
		assert!(report.entity("Challenge").unwrap().error.is_some());
		assert!(local.records(&EntityType::new("Challenge")).await.is_empty());
	}
}
