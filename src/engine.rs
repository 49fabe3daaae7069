use std::sync::Arc;

use log::{info, warn};

use crate::config::Settings;
use crate::error::SyncResult;
use crate::model::{EntityRegistry, RecordFilter, StatusCounts, StatusReport, SyncStatus, VersionClock};
use crate::observability::MetricsRegistry;
use crate::router::StoreRouter;
use crate::store::{EntityStore, MemoryStore, PgStore, StoreRole};
use crate::sync::{
	BatchSyncer, MirrorPuller, PushContext, PushWorkerPool, RetryPolicy, SyncRunReport, SyncSwitch,
	WriteThroughPersister,
};

/// Tunables of a `SyncEngine`, usually taken from `Settings`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
	pub sync_enabled: bool,
	pub batch_size: usize,
	pub push_workers: usize,
	pub push_queue_capacity: usize,
	pub retry: RetryPolicy,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			sync_enabled: true,
			batch_size: 100,
			push_workers: 4,
			push_queue_capacity: 1024,
			retry: RetryPolicy::default(),
		}
	}
}

impl From<&Settings> for EngineOptions {
	fn from(s: &Settings) -> Self {
		Self {
			sync_enabled: s.sync_enabled,
			batch_size: s.sync_batch_size,
			push_workers: s.push_workers,
			push_queue_capacity: s.push_queue_capacity,
			retry: s.retry_policy(),
		}
	}
}

/// Wires the stores, the push pool and the batch jobs together.
///
/// One engine per process. Domain code writes through `persister()`;
/// operator commands call `push`, `pull`, `status_report` and `migrate`.
pub struct SyncEngine {
	router: StoreRouter,
	registry: Arc<EntityRegistry>,
	switch: SyncSwitch,
	metrics: Arc<MetricsRegistry>,
	pool: Arc<PushWorkerPool>,
	persister: WriteThroughPersister,
	batch: BatchSyncer,
	puller: MirrorPuller,
}

impl SyncEngine {
	/// Build an engine over already-open stores. Starts the push pool, so
	/// this must run inside a tokio runtime.
	pub fn new(
		local: Arc<dyn EntityStore>,
		mirror: Arc<dyn EntityStore>,
		registry: EntityRegistry,
		options: EngineOptions,
	) -> Self {
		let registry = Arc::new(registry);
		let metrics = Arc::new(MetricsRegistry::new());
		let switch = SyncSwitch::new(options.sync_enabled);

		let pool = Arc::new(PushWorkerPool::start(
			PushContext {
				local: Arc::clone(&local),
				mirror: Arc::clone(&mirror),
				registry: Arc::clone(&registry),
				metrics: Arc::clone(&metrics),
				retry: options.retry,
				switch: switch.clone(),
			},
			options.push_workers,
			options.push_queue_capacity,
		));
		let persister = WriteThroughPersister::new(
			Arc::clone(&local),
			Arc::clone(&registry),
			Arc::clone(&pool),
			switch.clone(),
			Arc::new(VersionClock::new()),
		);
		let batch = BatchSyncer::new(
			Arc::clone(&local),
			Arc::clone(&mirror),
			Arc::clone(&registry),
			switch.clone(),
			options.batch_size,
			Arc::clone(&metrics),
		);
		let puller = MirrorPuller::new(
			Arc::clone(&local),
			Arc::clone(&mirror),
			Arc::clone(&registry),
			switch.clone(),
			options.batch_size,
			Arc::clone(&metrics),
		);

		Self {
			router: StoreRouter::new(local, mirror),
			registry,
			switch,
			metrics,
			pool,
			persister,
			batch,
			puller,
		}
	}

	/// Connect both Postgres stores described by `settings`.
	///
	/// Without a mirror URL (only valid while sync is disabled) the mirror is
	/// an unreachable placeholder, so a stray push fails instead of writing
	/// somewhere unexpected.
	pub async fn connect(settings: &Settings) -> SyncResult<Self> {
		let local: Arc<dyn EntityStore> = Arc::new(
			PgStore::connect(
				settings.local_database_url.as_str(),
				StoreRole::Local,
				&settings.table_prefix,
				settings.max_connections,
			)
			.await?,
		);
		let mirror: Arc<dyn EntityStore> = match &settings.mirror_database_url {
			Some(url) => Arc::new(
				PgStore::connect(
					url.as_str(),
					StoreRole::Mirror,
					&settings.table_prefix,
					settings.max_connections,
				)
				.await?,
			),
			None => {
				warn!("no mirror configured; replication is unavailable");
				let placeholder = MemoryStore::mirror();
				placeholder.set_available(false);
				Arc::new(placeholder)
			}
		};

		Ok(Self::new(
			local,
			mirror,
			EntityRegistry::masshealth(),
			EngineOptions::from(settings),
		))
	}

	/// The write path for domain code.
	pub fn persister(&self) -> &WriteThroughPersister {
		&self.persister
	}

	/// Run the dependency-ordered batch push.
	pub async fn push(&self, full: bool) -> SyncRunReport {
		self.batch.run(full).await
	}

	/// Copy mirror rows into the local store, optionally for one type only.
	pub async fn pull(&self, full: bool, only: Option<&str>) -> SyncResult<SyncRunReport> {
		self.puller.run(full, only).await
	}

	/// Per-type, per-status row counts from the local store. A type whose
	/// counts cannot be read is listed under `errors`.
	pub async fn status_report(&self) -> StatusReport {
		let mut report = StatusReport {
			sync_enabled: self.switch.is_enabled(),
			..StatusReport::default()
		};
		let local = self.router.db_for_read();
		'types: for descriptor in self.registry.iter() {
			let mut counts = StatusCounts::default();
			for status in SyncStatus::ALL {
				match local.count(&descriptor.entity, &RecordFilter::status(status)).await {
					Ok(n) => counts.set(status, n),
					Err(e) => {
						report
							.errors
							.insert(descriptor.entity.to_string(), e.to_string());
						continue 'types;
					}
				}
			}
			report.types.insert(descriptor.entity.to_string(), counts);
		}
		report
	}

	pub async fn migrate(&self, target: StoreRole) -> SyncResult<()> {
		self.router.migrate(target, &self.registry).await?;
		info!("{} schema is up to date", target);
		Ok(())
	}

	pub fn set_sync_enabled(&self, enabled: bool) {
		self.switch.set(enabled);
		info!("sync {}", if enabled { "enabled" } else { "disabled" });
	}

	pub fn is_sync_enabled(&self) -> bool {
		self.switch.is_enabled()
	}

	pub fn metrics(&self) -> &Arc<MetricsRegistry> {
		&self.metrics
	}

	pub fn router(&self) -> &StoreRouter {
		&self.router
	}

	pub fn registry(&self) -> &EntityRegistry {
		&self.registry
	}

	/// Wait until no background propagation is queued, running or delayed.
	pub async fn wait_idle(&self) {
		self.pool.wait_idle().await;
	}

	/// Drain the push pool, then release both stores.
	pub async fn close(&self) {
		self.pool.close().await;
		self.router.local().close().await;
		self.router.mirror().close().await;
	}
}
