pub mod record;
pub mod registry;
pub mod status;

pub use record::{EntityType, RecordFilter, RecordId, SyncableRecord, VersionClock};
pub use registry::{EntityDescriptor, EntityRegistry, RegistryError, RelationSpec};
pub use status::{StatusCounts, StatusReport, SyncState, SyncStatus};
