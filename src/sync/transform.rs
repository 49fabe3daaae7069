//! The push steps shared by the background worker and the batch syncer:
//! resolve relations against the mirror, upsert, then settle the local
//! status.

use chrono::Utc;
use log::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::model::{EntityDescriptor, EntityRegistry, SyncState, SyncableRecord};
use crate::store::{EntityStore, UpsertOutcome};

/// Build the mirror-bound copy of `record`.
///
/// Scalar fields are copied verbatim. Every populated relation must point at
/// a record that already exists in the mirror (identities are shared, so no
/// remapping happens); the first missing target aborts with
/// `UnresolvedDependency` before anything is written.
pub async fn mirror_bound(
	mirror: &dyn EntityStore,
	descriptor: &EntityDescriptor,
	record: &SyncableRecord,
) -> SyncResult<SyncableRecord> {
	for (field, target_id) in &record.relations {
		let Some(target_id) = target_id else {
			continue;
		};
		let spec = descriptor.relation_spec(field).ok_or_else(|| {
			SyncError::Validation(format!("{} has no relation field `{}`", record.entity, field))
		})?;
		if !mirror.exists(&spec.target, *target_id).await? {
			return Err(SyncError::UnresolvedDependency {
				entity: record.entity.clone(),
				id: record.id,
				field: field.clone(),
				target: spec.target.clone(),
				target_id: *target_id,
			});
		}
	}

	let mut bound = record.clone();
	bound.sync = SyncState::default();
	Ok(bound)
}

/// Resolve and upsert one record into the mirror. At most one mirror write.
pub async fn push_to_mirror(
	mirror: &dyn EntityStore,
	registry: &EntityRegistry,
	record: &SyncableRecord,
) -> SyncResult<UpsertOutcome> {
	let descriptor = registry.descriptor(&record.entity)?;
	let bound = mirror_bound(mirror, descriptor, record).await?;
	mirror.upsert(&bound).await
}

/// Write the local status that follows a push attempt: `synced` on a
/// created/updated mirror row, `failed` otherwise (including a stale write,
/// which means the mirror diverged ahead of the local row).
///
/// The write is keyed on the version that was pushed, so a newer local
/// write keeps its own `pending` status. Returns whether it was applied.
pub async fn settle(
	local: &dyn EntityStore,
	record: &SyncableRecord,
	result: &SyncResult<UpsertOutcome>,
) -> SyncResult<bool> {
	let mut state = record.sync;
	match result {
		Ok(UpsertOutcome::Created | UpsertOutcome::Updated) => state.mark_synced(Utc::now()),
		Ok(UpsertOutcome::Stale) => {
			warn!(
				"mirror holds a newer version of {} {} than the local store; pull required",
				record.entity, record.id
			);
			state.mark_failed();
		}
		Err(_) => state.mark_failed(),
	}

	let applied = local
		.set_sync_state(&record.entity, record.id, record.version, state)
		.await?;
	if !applied {
		debug!(
			"{} {} changed while pushing version {}; status left to the newer write",
			record.entity, record.id, record.version
		);
	}
	Ok(applied)
}
