pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::model::{EntityRegistry, EntityType, RecordFilter, RecordId, SyncState, SyncableRecord};

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

/// Which side of the replication a store instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
	/// Authoritative store serving every domain read and write.
	Local,
	/// Eventually-consistent replica for out-of-band consumers.
	Mirror,
}

impl fmt::Display for StoreRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreRole::Local => f.write_str("local"),
			StoreRole::Mirror => f.write_str("mirror"),
		}
	}
}

/// How `update` treats the stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
	/// Apply only if the stored version is not newer than the incoming one.
	Versioned,
	/// Apply unconditionally.
	Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
	Applied,
	/// The stored row carries a newer version; nothing was written.
	Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
	Created,
	Updated,
	Stale,
}

impl From<WriteOutcome> for UpsertOutcome {
	fn from(w: WriteOutcome) -> Self {
		match w {
			WriteOutcome::Applied => UpsertOutcome::Updated,
			WriteOutcome::Stale => UpsertOutcome::Stale,
		}
	}
}

/// Uniform access to either store. Implementations must be safe to share
/// between the push workers and the batch jobs.
///
/// `update` replaces the stored fields and relations with the record's, so
/// callers pass complete rows.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
	fn role(&self) -> StoreRole;

	async fn get(&self, entity: &EntityType, id: RecordId) -> SyncResult<SyncableRecord>;

	async fn exists(&self, entity: &EntityType, id: RecordId) -> SyncResult<bool>;

	/// Insert with the record's own identity. Fails with `AlreadyExists`.
	async fn insert(&self, record: &SyncableRecord) -> SyncResult<()>;

	/// Fails with `NotFound` when the row is absent.
	async fn update(&self, record: &SyncableRecord, mode: UpdateMode) -> SyncResult<WriteOutcome>;

	/// Local deletes fail with `NotFound` when absent; mirror deletes are
	/// idempotent.
	async fn delete(&self, entity: &EntityType, id: RecordId) -> SyncResult<()>;

	/// Matching rows ordered by the position of their status in
	/// `filter.statuses` (pending before failed for `unsynced`), then by id.
	async fn query(&self, entity: &EntityType, filter: &RecordFilter) -> SyncResult<Vec<SyncableRecord>>;

	async fn count(&self, entity: &EntityType, filter: &RecordFilter) -> SyncResult<u64>;

	/// Writes only the `{sync_status, synced_at}` pair, and only while the
	/// row still carries `expected_version`. Returns whether it was written.
	async fn set_sync_state(
		&self,
		entity: &EntityType,
		id: RecordId,
		expected_version: u64,
		state: SyncState,
	) -> SyncResult<bool>;

	/// Create the per-type tables. Callers go through `StoreRouter`, which
	/// never migrates the mirror.
	async fn migrate(&self, registry: &EntityRegistry) -> SyncResult<()>;

	/// Lightweight connectivity check.
	async fn ping(&self) -> SyncResult<()>;

	/// Release connections. The store is unusable afterwards.
	async fn close(&self) {}

	/// Insert if absent, otherwise a versioned update. An insert that loses
	/// the race against a concurrent writer falls back to the update so the
	/// newest version still wins.
	async fn upsert(&self, record: &SyncableRecord) -> SyncResult<UpsertOutcome> {
		if self.exists(&record.entity, record.id).await? {
			return Ok(self.update(record, UpdateMode::Versioned).await?.into());
		}
		match self.insert(record).await {
			Ok(()) => Ok(UpsertOutcome::Created),
			Err(SyncError::AlreadyExists { .. }) => {
				Ok(self.update(record, UpdateMode::Versioned).await?.into())
			}
			Err(e) => Err(e),
		}
	}
}
