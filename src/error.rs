use thiserror::Error;

use crate::model::{EntityType, RecordId};

/// Errors raised by stores and sync jobs.
///
/// Push and pull failures never reach the caller of a domain write; they are
/// recorded as a `failed` status on the local row and in job reports.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("{entity} {id} not found")]
	NotFound { entity: EntityType, id: RecordId },

	#[error("store unavailable: {0}")]
	StoreUnavailable(String),

	#[error(
		"unresolved dependency: {entity} {id} references {target} {target_id} through `{field}`, which is not present in the mirror"
	)]
	UnresolvedDependency {
		entity: EntityType,
		id: RecordId,
		field: String,
		target: EntityType,
		target_id: RecordId,
	},

	#[error("validation failed: {0}")]
	Validation(String),

	#[error("{entity} {id} already exists")]
	AlreadyExists { entity: EntityType, id: RecordId },

	#[error("schema migration refused on the mirror store")]
	MigrationRefused,

	#[error("unknown entity type `{0}`")]
	UnknownEntityType(String),

	#[error("propagation queue is full")]
	QueueFull,

	#[error("propagation worker pool is closed")]
	PoolClosed,

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl SyncError {
	/// True when retrying later may succeed without any new write.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			SyncError::StoreUnavailable(_) | SyncError::UnresolvedDependency { .. }
		)
	}

	/// Short stable label, used for metrics and log fields.
	pub fn kind(&self) -> &'static str {
		match self {
			SyncError::NotFound { .. } => "not_found",
			SyncError::StoreUnavailable(_) => "store_unavailable",
			SyncError::UnresolvedDependency { .. } => "unresolved_dependency",
			SyncError::Validation(_) => "validation",
			SyncError::AlreadyExists { .. } => "already_exists",
			SyncError::MigrationRefused => "migration_refused",
			SyncError::UnknownEntityType(_) => "unknown_entity_type",
			SyncError::QueueFull => "queue_full",
			SyncError::PoolClosed => "pool_closed",
			SyncError::Serialization(_) => "serialization",
		}
	}
}

pub type SyncResult<T> = Result<T, SyncError>;
