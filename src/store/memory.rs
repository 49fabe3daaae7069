use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{EntityStore, StoreRole, UpdateMode, WriteOutcome};
use crate::error::{SyncError, SyncResult};
use crate::model::{EntityRegistry, EntityType, RecordFilter, RecordId, SyncState, SyncableRecord};

/// Operation kinds recorded by `MemoryStore` for later inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
	Get,
	Exists,
	Insert,
	Update,
	Delete,
	Query,
	SetSyncState,
}

/// In-process store. Serves as the local store for embedded use and as a
/// stand-in for either side in tests.
///
/// `set_available(false)` makes every call fail with `StoreUnavailable`,
/// which is how tests simulate an unreachable mirror.
pub struct MemoryStore {
	role: StoreRole,
	tables: RwLock<HashMap<EntityType, BTreeMap<RecordId, SyncableRecord>>>,
	available: AtomicBool,
	writes: AtomicU64,
	ops: Mutex<Vec<(StoreOp, EntityType, Option<RecordId>)>>,
}

impl MemoryStore {
	pub fn new(role: StoreRole) -> Self {
		Self {
			role,
			tables: RwLock::new(HashMap::new()),
			available: AtomicBool::new(true),
			writes: AtomicU64::new(0),
			ops: Mutex::new(Vec::new()),
		}
	}

	pub fn local() -> Self {
		Self::new(StoreRole::Local)
	}

	pub fn mirror() -> Self {
		Self::new(StoreRole::Mirror)
	}

	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::SeqCst);
	}

	/// Number of inserts, applied updates and deletes so far. Sync state
	/// writes are not counted.
	pub fn write_count(&self) -> u64 {
		self.writes.load(Ordering::SeqCst)
	}

	/// Chronological log of every call that reached the store.
	pub async fn operations(&self) -> Vec<(StoreOp, EntityType, Option<RecordId>)> {
		self.ops.lock().await.clone()
	}

	pub async fn clear_operations(&self) {
		self.ops.lock().await.clear();
	}

	/// Snapshot of one table ordered by id.
	pub async fn records(&self, entity: &EntityType) -> Vec<SyncableRecord> {
		self.tables
			.read()
			.await
			.get(entity)
			.map(|t| t.values().cloned().collect())
			.unwrap_or_default()
	}

	async fn enter(&self, op: StoreOp, entity: &EntityType, id: Option<RecordId>) -> SyncResult<()> {
		self.ops.lock().await.push((op, entity.clone(), id));
		if self.available.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(SyncError::StoreUnavailable(format!(
				"{} store is unreachable",
				self.role
			)))
		}
	}

	/// The mirror holds replicated content only, no sync bookkeeping.
	fn stored_form(&self, record: &SyncableRecord) -> SyncableRecord {
		let mut row = record.clone();
		if self.role == StoreRole::Mirror {
			row.sync = SyncState::default();
		}
		row
	}
}

#[async_trait]
impl EntityStore for MemoryStore {
	fn role(&self) -> StoreRole {
		self.role
	}

	async fn get(&self, entity: &EntityType, id: RecordId) -> SyncResult<SyncableRecord> {
		self.enter(StoreOp::Get, entity, Some(id)).await?;
		self.tables
			.read()
			.await
			.get(entity)
			.and_then(|t| t.get(&id))
			.cloned()
			.ok_or_else(|| SyncError::NotFound {
				entity: entity.clone(),
				id,
			})
	}

	async fn exists(&self, entity: &EntityType, id: RecordId) -> SyncResult<bool> {
		self.enter(StoreOp::Exists, entity, Some(id)).await?;
		Ok(self
			.tables
			.read()
			.await
			.get(entity)
			.is_some_and(|t| t.contains_key(&id)))
	}

	async fn insert(&self, record: &SyncableRecord) -> SyncResult<()> {
		self.enter(StoreOp::Insert, &record.entity, Some(record.id)).await?;
		let mut tables = self.tables.write().await;
		let table = tables.entry(record.entity.clone()).or_default();
		if table.contains_key(&record.id) {
			return Err(SyncError::AlreadyExists {
				entity: record.entity.clone(),
				id: record.id,
			});
		}
		table.insert(record.id, self.stored_form(record));
		self.writes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn update(&self, record: &SyncableRecord, mode: UpdateMode) -> SyncResult<WriteOutcome> {
		self.enter(StoreOp::Update, &record.entity, Some(record.id)).await?;
		let mut tables = self.tables.write().await;
		let row = tables
			.get_mut(&record.entity)
			.and_then(|t| t.get_mut(&record.id))
			.ok_or_else(|| SyncError::NotFound {
				entity: record.entity.clone(),
				id: record.id,
			})?;

		if mode == UpdateMode::Versioned && row.version > record.version {
			return Ok(WriteOutcome::Stale);
		}

		row.version = record.version;
		row.fields = record.fields.clone();
		row.relations = record.relations.clone();
		if self.role == StoreRole::Local {
			row.sync = record.sync;
		}
		self.writes.fetch_add(1, Ordering::SeqCst);
		Ok(WriteOutcome::Applied)
	}

	async fn delete(&self, entity: &EntityType, id: RecordId) -> SyncResult<()> {
		self.enter(StoreOp::Delete, entity, Some(id)).await?;
		let removed = self
			.tables
			.write()
			.await
			.get_mut(entity)
			.and_then(|t| t.remove(&id));
		match (removed, self.role) {
			(Some(_), _) => {
				self.writes.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
			(None, StoreRole::Mirror) => Ok(()),
			(None, StoreRole::Local) => Err(SyncError::NotFound {
				entity: entity.clone(),
				id,
			}),
		}
	}

	async fn query(&self, entity: &EntityType, filter: &RecordFilter) -> SyncResult<Vec<SyncableRecord>> {
		self.enter(StoreOp::Query, entity, None).await?;
		let tables = self.tables.read().await;
		let Some(table) = tables.get(entity) else {
			return Ok(Vec::new());
		};
		let mut matching: Vec<SyncableRecord> = table
			.values()
			.filter(|r| filter.matches(r))
			.cloned()
			.collect();
		matching.sort_by_key(|r| filter.rank(r));
		if let Some(limit) = filter.limit {
			matching.truncate(limit);
		}
		Ok(matching)
	}

	async fn count(&self, entity: &EntityType, filter: &RecordFilter) -> SyncResult<u64> {
		self.enter(StoreOp::Query, entity, None).await?;
		let tables = self.tables.read().await;
		let n = tables
			.get(entity)
			.map(|t| t.values().filter(|r| filter.matches(r)).count())
			.unwrap_or(0);
		Ok(match filter.limit {
			Some(limit) => n.min(limit) as u64,
			None => n as u64,
		})
	}

	async fn set_sync_state(
		&self,
		entity: &EntityType,
		id: RecordId,
		expected_version: u64,
		state: SyncState,
	) -> SyncResult<bool> {
		self.enter(StoreOp::SetSyncState, entity, Some(id)).await?;
		let mut tables = self.tables.write().await;
		match tables.get_mut(entity).and_then(|t| t.get_mut(&id)) {
			Some(row) if row.version == expected_version => {
				row.sync = state;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn migrate(&self, registry: &EntityRegistry) -> SyncResult<()> {
		let mut tables = self.tables.write().await;
		for d in registry.iter() {
			tables.entry(d.entity.clone()).or_default();
		}
		Ok(())
	}

	async fn ping(&self) -> SyncResult<()> {
		if self.available.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(SyncError::StoreUnavailable(format!(
				"{} store is unreachable",
				self.role
			)))
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::model::SyncStatus;
	use crate::store::UpsertOutcome;
	use chrono::Utc;
	use serde_json::json;

	fn workout(version: u64) -> SyncableRecord {
		let mut r = SyncableRecord::with_id("Workout", RecordId::nil()).field("name", "Squat");
		r.version = version;
		r
	}

	#[tokio::test]
	async fn insert_get_and_duplicate() {
		let store = MemoryStore::local();
		let r = workout(1);
		store.insert(&r).await.unwrap();
		assert_eq!(store.get(&r.entity, r.id).await.unwrap(), r);
		assert!(matches!(
			store.insert(&r).await,
			Err(SyncError::AlreadyExists { .. })
		));
	}

	#[tokio::test]
	async fn versioned_update_rejects_older_version() {
		let store = MemoryStore::mirror();
		store.insert(&workout(5)).await.unwrap();

		let stale = workout(4).field("name", "Lunge");
		assert_eq!(
			store.update(&stale, UpdateMode::Versioned).await.unwrap(),
			WriteOutcome::Stale
		);
		let row = store.get(&stale.entity, stale.id).await.unwrap();
		assert_eq!(row.fields["name"], json!("Squat"));

		assert_eq!(
			store.update(&stale, UpdateMode::Overwrite).await.unwrap(),
			WriteOutcome::Applied
		);
	}

	#[tokio::test]
	async fn update_replaces_fields_and_relations() {
		let store = MemoryStore::mirror();
		store
			.insert(&workout(1).field("sets", 3))
			.await
			.unwrap();
		let mut replacement = SyncableRecord::with_id("Workout", RecordId::nil()).field("name", "Deadlift");
		replacement.version = 2;
		store.update(&replacement, UpdateMode::Overwrite).await.unwrap();
		let row = store.get(&replacement.entity, replacement.id).await.unwrap();
		assert!(row.same_content(&replacement));
		assert!(!row.fields.contains_key("sets"));
		assert!(row.relations.is_empty());
	}

	#[tokio::test]
	async fn mirror_rows_carry_no_sync_state() {
		let store = MemoryStore::mirror();
		let mut r = workout(1);
		r.sync.mark_synced(Utc::now());
		assert_eq!(store.upsert(&r).await.unwrap(), UpsertOutcome::Created);
		let row = store.get(&r.entity, r.id).await.unwrap();
		assert!(row.sync.synced_at.is_none());
	}

	#[tokio::test]
	async fn set_sync_state_respects_version() {
		let store = MemoryStore::local();
		store.insert(&workout(7)).await.unwrap();
		let e = EntityType::new("Workout");
		assert!(!store
			.set_sync_state(&e, RecordId::nil(), 6, SyncState::synced(Utc::now()))
			.await
			.unwrap());
		assert!(store
			.set_sync_state(&e, RecordId::nil(), 7, SyncState::synced(Utc::now()))
			.await
			.unwrap());
		assert_eq!(
			store.get(&e, RecordId::nil()).await.unwrap().status(),
			SyncStatus::Synced
		);
	}

	#[tokio::test]
	async fn unavailable_store_fails_every_call() {
		let store = MemoryStore::mirror();
		store.set_available(false);
		assert!(matches!(
			store.exists(&EntityType::new("Workout"), RecordId::nil()).await,
			Err(SyncError::StoreUnavailable(_))
		));
		assert!(store.ping().await.is_err());
		assert_eq!(store.write_count(), 0);
	}

	#[tokio::test]
	async fn delete_semantics_differ_by_role() {
		let e = EntityType::new("Workout");
		assert!(MemoryStore::mirror().delete(&e, RecordId::nil()).await.is_ok());
		assert!(matches!(
			MemoryStore::local().delete(&e, RecordId::nil()).await,
			Err(SyncError::NotFound { .. })
		));
	}

	#[tokio::test]
	async fn query_filters_and_limits_in_id_order() {
		let store = MemoryStore::local();
		for _ in 0..5 {
			store.insert(&SyncableRecord::new("Routine")).await.unwrap();
		}
		let e = EntityType::new("Routine");
		let rows = store
			.query(&e, &RecordFilter::unsynced().limit(3))
			.await
			.unwrap();
		assert_eq!(rows.len(), 3);
		assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
		assert_eq!(store.count(&e, &RecordFilter::all()).await.unwrap(), 5);
		assert_eq!(
			store
				.count(&e, &RecordFilter::status(SyncStatus::Synced))
				.await
				.unwrap(),
			0
		);
	}

	#[tokio::test]
	async fn unsynced_query_puts_pending_ahead_of_failed() {
		let store = MemoryStore::local();
		let e = EntityType::new("Workout");
		for _ in 0..3 {
			let mut failed = SyncableRecord::new("Workout");
			failed.sync.mark_failed();
			store.insert(&failed).await.unwrap();
		}
		let pending = SyncableRecord::new("Workout");
		store.insert(&pending).await.unwrap();

		let rows = store
			.query(&e, &RecordFilter::unsynced().limit(2))
			.await
			.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].id, pending.id);
		assert_eq!(rows[1].status(), SyncStatus::Failed);
	}
}
