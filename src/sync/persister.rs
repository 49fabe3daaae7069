use std::sync::Arc;

use log::{debug, warn};

use super::{PropagationJob, PushWorkerPool, SyncSwitch};
use crate::error::SyncResult;
use crate::model::{EntityRegistry, EntityType, RecordId, SyncState, SyncableRecord, VersionClock};
use crate::store::{EntityStore, UpdateMode};

/// The only write path domain code uses for syncable records.
///
/// Every mutation commits to the local store first. Propagation to the mirror
/// is queued afterwards and can never fail or delay the local commit.
pub struct WriteThroughPersister {
	local: Arc<dyn EntityStore>,
	registry: Arc<EntityRegistry>,
	pool: Arc<PushWorkerPool>,
	switch: SyncSwitch,
	clock: Arc<VersionClock>,
}

impl WriteThroughPersister {
	pub fn new(
		local: Arc<dyn EntityStore>,
		registry: Arc<EntityRegistry>,
		pool: Arc<PushWorkerPool>,
		switch: SyncSwitch,
		clock: Arc<VersionClock>,
	) -> Self {
		Self {
			local,
			registry,
			pool,
			switch,
			clock,
		}
	}

	/// Insert a new record as `pending` and queue its push.
	pub async fn create(&self, mut record: SyncableRecord) -> SyncResult<SyncableRecord> {
		self.registry.validate(&record)?;
		if record.id == RecordId::nil() {
			record.id = RecordId::new();
		}
		record.version = self.clock.next();
		record.sync = SyncState::pending();

		self.local.insert(&record).await?;
		debug!("created {} {} (version {})", record.entity, record.id, record.version);

		self.enqueue(PropagationJob::push(record.entity.clone(), record.id));
		Ok(record)
	}

	/// Apply `record`'s fields and relations to the existing local row, stamp
	/// a newer version and queue a push. Fields absent from `record` keep
	/// their stored values.
	pub async fn update(&self, record: SyncableRecord) -> SyncResult<SyncableRecord> {
		self.registry.validate(&record)?;
		let mut merged = self.local.get(&record.entity, record.id).await?;

		merged.version = self.clock.next().max(merged.version + 1);
		merged.fields.extend(record.fields);
		merged.relations.extend(record.relations);
		merged.sync.mark_pending();

		self.local.update(&merged, UpdateMode::Overwrite).await?;
		let committed = self.local.get(&merged.entity, merged.id).await?;
		debug!(
			"updated {} {} (version {})",
			committed.entity, committed.id, committed.version
		);

		self.enqueue(PropagationJob::push(committed.entity.clone(), committed.id));
		Ok(committed)
	}

	/// Delete locally, then queue removal from the mirror.
	pub async fn delete(&self, entity: &EntityType, id: RecordId) -> SyncResult<()> {
		self.registry.descriptor(entity)?;
		self.local.delete(entity, id).await?;
		debug!("deleted {} {}", entity, id);

		self.enqueue(PropagationJob::delete(entity.clone(), id));
		Ok(())
	}

	fn enqueue(&self, job: PropagationJob) {
		if !self.switch.is_enabled() {
			return;
		}
		if let Err(e) = self.pool.schedule(job.clone()) {
			warn!("{:?} not queued ({}); the next batch run will pick it up", job, e);
		}
	}
}
