use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Replication state of a single local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	/// Written locally, not yet confirmed in the mirror.
	Pending,
	/// Last push (or pull) verified the mirror holds this version.
	Synced,
	/// Last propagation attempt failed; the batch job retries it.
	Failed,
}

impl SyncStatus {
	pub const ALL: [SyncStatus; 3] = [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed];

	pub fn as_str(&self) -> &'static str {
		match self {
			SyncStatus::Pending => "pending",
			SyncStatus::Synced => "synced",
			SyncStatus::Failed => "failed",
		}
	}
}

impl Default for SyncStatus {
	fn default() -> Self {
		SyncStatus::Pending
	}
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SyncStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(SyncStatus::Pending),
			"synced" => Ok(SyncStatus::Synced),
			"failed" => Ok(SyncStatus::Failed),
			other => Err(format!("unknown sync status `{}`", other)),
		}
	}
}

/// The `{sync_status, synced_at}` pair co-located on every syncable row.
///
/// Pure state: the helpers only flip fields, persisting them is the
/// caller's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
	pub sync_status: SyncStatus,
	pub synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
	pub fn pending() -> Self {
		Self::default()
	}

	pub fn synced(now: DateTime<Utc>) -> Self {
		Self {
			sync_status: SyncStatus::Synced,
			synced_at: Some(now),
		}
	}

	/// Marks the row as needing a push. `synced_at` keeps the time of the
	/// last successful push.
	pub fn mark_pending(&mut self) {
		self.sync_status = SyncStatus::Pending;
	}

	pub fn mark_synced(&mut self, now: DateTime<Utc>) {
		self.sync_status = SyncStatus::Synced;
		self.synced_at = Some(now);
	}

	pub fn mark_failed(&mut self) {
		self.sync_status = SyncStatus::Failed;
	}

	pub fn is_synced(&self) -> bool {
		self.sync_status == SyncStatus::Synced
	}
}

/// Per-status row counts for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
	pub pending: u64,
	pub synced: u64,
	pub failed: u64,
}

impl StatusCounts {
	pub fn set(&mut self, status: SyncStatus, count: u64) {
		match status {
			SyncStatus::Pending => self.pending = count,
			SyncStatus::Synced => self.synced = count,
			SyncStatus::Failed => self.failed = count,
		}
	}

	pub fn total(&self) -> u64 {
		self.pending + self.synced + self.failed
	}
}

/// Operator-facing summary of replication state across all entity types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
	pub sync_enabled: bool,
	pub types: BTreeMap<String, StatusCounts>,
	/// Types whose counts could not be read, with the error message.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub errors: BTreeMap<String, String>,
}

impl StatusReport {
	pub fn totals(&self) -> StatusCounts {
		self.types.values().fold(StatusCounts::default(), |mut acc, c| {
			acc.pending += c.pending;
			acc.synced += c.synced;
			acc.failed += c.failed;
			acc
		})
	}
}
