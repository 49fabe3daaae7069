use std::sync::Arc;

use log::warn;

use crate::error::{SyncError, SyncResult};
use crate::model::EntityRegistry;
use crate::store::{EntityStore, StoreRole};

/// Decides which store serves an operation.
///
/// Domain reads and writes always resolve to the local store; the mirror is
/// reachable only through the sync jobs. Schema migrations apply to the local
/// store and are refused for the mirror, whose schema is managed elsewhere.
#[derive(Clone)]
pub struct StoreRouter {
	local: Arc<dyn EntityStore>,
	mirror: Arc<dyn EntityStore>,
}

impl StoreRouter {
	pub fn new(local: Arc<dyn EntityStore>, mirror: Arc<dyn EntityStore>) -> Self {
		Self { local, mirror }
	}

	pub fn db_for_read(&self) -> &Arc<dyn EntityStore> {
		&self.local
	}

	pub fn db_for_write(&self) -> &Arc<dyn EntityStore> {
		&self.local
	}

	pub fn local(&self) -> &Arc<dyn EntityStore> {
		&self.local
	}

	pub fn mirror(&self) -> &Arc<dyn EntityStore> {
		&self.mirror
	}

	pub fn allow_migrate(&self, target: StoreRole) -> bool {
		match target {
			StoreRole::Local => true,
			StoreRole::Mirror => false,
		}
	}

	pub async fn migrate(&self, target: StoreRole, registry: &EntityRegistry) -> SyncResult<()> {
		if !self.allow_migrate(target) {
			warn!("refusing schema migration on the {} store", target);
			return Err(SyncError::MigrationRefused);
		}
		self.local.migrate(registry).await
	}
}
