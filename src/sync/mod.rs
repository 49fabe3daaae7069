pub mod batch;
pub mod persister;
pub mod pull;
pub mod transform;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::model::{EntityType, RecordId};

pub use batch::BatchSyncer;
pub use persister::WriteThroughPersister;
pub use pull::MirrorPuller;
pub use worker::{PushContext, PushOutcome, PushWorkerPool, push_record};

/// Runtime-togglable global sync switch, shared by the persister and the
/// batch jobs.
#[derive(Debug, Clone)]
pub struct SyncSwitch(Arc<AtomicBool>);

impl SyncSwitch {
	pub fn new(enabled: bool) -> Self {
		Self(Arc::new(AtomicBool::new(enabled)))
	}

	pub fn is_enabled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}

	pub fn set(&self, enabled: bool) {
		self.0.store(enabled, Ordering::SeqCst);
	}
}

/// A unit of background propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationJob {
	/// Push the current local value of a record. `attempt` is 0 for the push
	/// scheduled by the write itself and counts backoff retries after that.
	Push {
		entity: EntityType,
		id: RecordId,
		attempt: u32,
	},
	/// Remove a locally deleted record from the mirror. Not status-tracked.
	Delete { entity: EntityType, id: RecordId },
}

impl PropagationJob {
	pub fn push(entity: EntityType, id: RecordId) -> Self {
		PropagationJob::Push {
			entity,
			id,
			attempt: 0,
		}
	}

	pub fn delete(entity: EntityType, id: RecordId) -> Self {
		PropagationJob::Delete { entity, id }
	}
}

/// Bounded exponential backoff for pushes blocked on a relation whose
/// target has not reached the mirror yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Extra attempts after the first push; 0 disables retries.
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl RetryPolicy {
	pub fn disabled() -> Self {
		Self {
			max_attempts: 0,
			initial_backoff: Duration::ZERO,
			max_backoff: Duration::ZERO,
		}
	}

	/// Delay before retry number `attempt + 1`, with up to 10% jitter.
	pub fn delay(&self, attempt: u32) -> Duration {
		let base = self
			.initial_backoff
			.saturating_mul(1u32 << attempt.min(16))
			.min(self.max_backoff);
		let jitter_ms = (base.as_millis() as u64) / 10;
		if jitter_ms == 0 {
			return base;
		}
		base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
	}

	pub fn allows(&self, attempt: u32) -> bool {
		attempt < self.max_attempts
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(30),
		}
	}
}

/// Per-type counters of one batch job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeReport {
	pub entity: String,
	pub selected: usize,
	pub created: usize,
	pub updated: usize,
	/// Push: the mirror already held a newer version. Pull: the local row was
	/// newer or already consistent.
	pub skipped: usize,
	pub failed: usize,
	/// Set when the type could not be processed at all.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl TypeReport {
	pub fn new(entity: &EntityType) -> Self {
		Self {
			entity: entity.to_string(),
			..Self::default()
		}
	}

	pub fn succeeded(&self) -> usize {
		self.created + self.updated
	}
}

/// Outcome of a push or pull job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunReport {
	pub job: &'static str,
	pub full: bool,
	/// The run exited early because sync is disabled.
	pub skipped: bool,
	pub types: Vec<TypeReport>,
}

impl SyncRunReport {
	pub fn new(job: &'static str, full: bool) -> Self {
		Self {
			job,
			full,
			..Self::default()
		}
	}

	pub fn entity(&self, name: &str) -> Option<&TypeReport> {
		self.types.iter().find(|t| t.entity == name)
	}

	pub fn total_failed(&self) -> usize {
		self.types.iter().map(|t| t.failed).sum()
	}

	pub fn total_succeeded(&self) -> usize {
		self.types.iter().map(|t| t.succeeded()).sum()
	}
}
