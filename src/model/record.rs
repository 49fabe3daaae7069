use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::status::{SyncState, SyncStatus};

/// Name of a syncable entity type, e.g. `Workout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EntityType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for EntityType {
	fn from(s: &str) -> Self {
		Self::new(s)
	}
}

impl Borrow<str> for EntityType {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// Identity of a record, shared verbatim by the local and mirror stores.
///
/// Generated by the engine at creation time so neither store ever assigns
/// ids on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	pub fn nil() -> Self {
		Self(Uuid::nil())
	}

	pub fn as_uuid(&self) -> Uuid {
		self.0
	}
}

impl Default for RecordId {
	fn default() -> Self {
		Self::new()
	}
}

impl From<Uuid> for RecordId {
	fn from(u: Uuid) -> Self {
		Self(u)
	}
}

impl std::str::FromStr for RecordId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s).map(Self)
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// A domain entity participating in replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableRecord {
	pub entity: EntityType,
	pub id: RecordId,
	/// Monotonic write stamp; the mirror keeps the highest one it has seen.
	pub version: u64,
	/// Scalar domain attributes, copied verbatim between stores.
	pub fields: Map<String, Value>,
	/// Relation field -> identity of the referenced record (`None` = null).
	pub relations: BTreeMap<String, Option<RecordId>>,
	#[serde(flatten)]
	pub sync: SyncState,
}

impl SyncableRecord {
	/// New pending record with a freshly generated identity.
	pub fn new(entity: impl Into<EntityType>) -> Self {
		Self::with_id(entity, RecordId::new())
	}

	pub fn with_id(entity: impl Into<EntityType>, id: RecordId) -> Self {
		Self {
			entity: entity.into(),
			id,
			version: 0,
			fields: Map::new(),
			relations: BTreeMap::new(),
			sync: SyncState::pending(),
		}
	}

	pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	pub fn relation(mut self, name: impl Into<String>, target: Option<RecordId>) -> Self {
		self.relations.insert(name.into(), target);
		self
	}

	pub fn status(&self) -> SyncStatus {
		self.sync.sync_status
	}

	/// Same identity and same replicated content (fields and relations).
	/// Sync bookkeeping and versions are ignored.
	pub fn same_content(&self, other: &SyncableRecord) -> bool {
		self.entity == other.entity
			&& self.id == other.id
			&& self.fields == other.fields
			&& self.relations == other.relations
	}
}

/// Selection used by `query` and `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
	/// Empty means any status.
	pub statuses: Vec<SyncStatus>,
	pub limit: Option<usize>,
}

impl RecordFilter {
	pub fn all() -> Self {
		Self::default()
	}

	pub fn status(status: SyncStatus) -> Self {
		Self {
			statuses: vec![status],
			limit: None,
		}
	}

	/// Rows the batch syncer still owes the mirror. Pending rows sort first so
	/// a backlog of failing rows cannot crowd them out of a limited batch.
	pub fn unsynced() -> Self {
		Self {
			statuses: vec![SyncStatus::Pending, SyncStatus::Failed],
			limit: None,
		}
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn matches(&self, record: &SyncableRecord) -> bool {
		self.statuses.is_empty() || self.statuses.contains(&record.status())
	}

	/// Sort key of a matching record: its status position, then its id.
	pub fn rank(&self, record: &SyncableRecord) -> (usize, RecordId) {
		let pos = self
			.statuses
			.iter()
			.position(|s| *s == record.status())
			.unwrap_or(0);
		(pos, record.id)
	}
}

/// Hands out strictly increasing version stamps based on wall-clock
/// microseconds, so later writes win even across process restarts.
#[derive(Debug, Default)]
pub struct VersionClock {
	last: AtomicU64,
}

impl VersionClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self) -> u64 {
		let now = Utc::now().timestamp_micros().max(0) as u64;
		let mut prev = self.last.load(Ordering::Relaxed);
		loop {
			let candidate = now.max(prev + 1);
			match self
				.last
				.compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
			{
				Ok(_) => return candidate,
				Err(actual) => prev = actual,
			}
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn builder_starts_pending() {
		let mg = RecordId::new();
		let r = SyncableRecord::new("Workout")
			.field("name", "Squat")
			.relation("muscle_group", Some(mg));
		assert_eq!(r.status(), SyncStatus::Pending);
		assert_eq!(r.fields["name"], json!("Squat"));
		assert_eq!(r.relations["muscle_group"], Some(mg));
	}

	#[test]
	fn filter_matches_statuses() {
		let mut r = SyncableRecord::new("Routine");
		assert!(RecordFilter::all().matches(&r));
		assert!(RecordFilter::unsynced().matches(&r));
		r.sync.mark_synced(Utc::now());
		assert!(!RecordFilter::unsynced().matches(&r));
		assert!(RecordFilter::status(SyncStatus::Synced).matches(&r));
	}

	#[test]
	fn unsynced_ranks_pending_before_failed() {
		let filter = RecordFilter::unsynced();
		let mut failed = SyncableRecord::with_id("Workout", RecordId::nil());
		failed.sync.mark_failed();
		let pending = SyncableRecord::new("Workout");
		assert!(filter.rank(&pending) < filter.rank(&failed));
		assert_eq!(RecordFilter::all().rank(&failed), (0, RecordId::nil()));
	}

	#[test]
	fn same_content_ignores_sync_state() {
		let a = SyncableRecord::new("MuscleGroup").field("name", "Quads");
		let mut b = a.clone();
		b.version = 42;
		b.sync.mark_failed();
		assert!(a.same_content(&b));
		b.fields.insert("name".into(), json!("Hamstrings"));
		assert!(!a.same_content(&b));
	}

	#[test]
	fn version_clock_is_strictly_increasing() {
		let clock = VersionClock::new();
		let mut last = 0;
		for _ in 0..1000 {
			let v = clock.next();
			assert!(v > last);
			last = v;
		}
	}

	#[test]
	fn record_serializes_flat_sync_state() {
		let r = SyncableRecord::with_id("FitnessGoal", RecordId::nil());
		let v = serde_json::to_value(&r).unwrap();
		assert_eq!(v["sync_status"], json!("pending"));
		assert!(v["synced_at"].is_null());
	}
}
