use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Notify, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::{PropagationJob, RetryPolicy, SyncSwitch, transform};
use crate::error::{SyncError, SyncResult};
use crate::model::{EntityRegistry, EntityType, RecordId};
use crate::observability::MetricsRegistry;
use crate::store::{EntityStore, UpsertOutcome};

/// Everything a push needs. Shared by all workers.
pub struct PushContext {
	pub local: Arc<dyn EntityStore>,
	pub mirror: Arc<dyn EntityStore>,
	pub registry: Arc<EntityRegistry>,
	pub metrics: Arc<MetricsRegistry>,
	pub retry: RetryPolicy,
	/// Backoff retries are neither scheduled nor run while this is off.
	pub switch: SyncSwitch,
}

/// What one push invocation did.
#[derive(Debug)]
pub enum PushOutcome {
	/// The mirror write landed and the local row is `synced`.
	Synced(UpsertOutcome),
	/// The mirror already held a newer version; the local row is `failed`
	/// until a pull brings it in line.
	Stale,
	/// The local row was marked `failed` (or left to a newer write).
	Failed(SyncError),
	/// The record was deleted locally before the worker got to it.
	Vanished,
}

/// Push the canonical current value of (entity, id) to the mirror.
///
/// Re-reads the local row instead of trusting a snapshot taken at scheduling
/// time. Performs at most one mirror write and exactly one local status
/// write; never returns an error, failures surface as the row's status.
#[tracing::instrument(skip_all, fields(entity = %entity, id = %id))]
pub async fn push_record(ctx: &PushContext, entity: &EntityType, id: RecordId) -> PushOutcome {
	let record = match ctx.local.get(entity, id).await {
		Ok(r) => r,
		Err(SyncError::NotFound { .. }) => {
			debug!("{} {} vanished before its push ran", entity, id);
			return PushOutcome::Vanished;
		}
		Err(e) => {
			error!("cannot read {} {} from the local store: {}", entity, id, e);
			ctx.metrics.push_failed_total.with_label_values(&[e.kind()]).inc();
			return PushOutcome::Failed(e);
		}
	};

	let start = Instant::now();
	let result = transform::push_to_mirror(ctx.mirror.as_ref(), &ctx.registry, &record).await;
	ctx.metrics
		.push_latency_ms
		.observe(start.elapsed().as_millis() as f64);

	if let Err(e) = transform::settle(ctx.local.as_ref(), &record, &result).await {
		error!("failed to record sync status of {} {}: {}", entity, id, e);
	}

	match result {
		Ok(UpsertOutcome::Stale) => {
			ctx.metrics.push_stale_total.inc();
			PushOutcome::Stale
		}
		Ok(outcome) => {
			ctx.metrics.push_succeeded_total.inc();
			debug!("pushed {} {} ({:?})", entity, id, outcome);
			PushOutcome::Synced(outcome)
		}
		Err(e) => {
			ctx.metrics.push_failed_total.with_label_values(&[e.kind()]).inc();
			warn!("push of {} {} failed: {}", entity, id, e);
			PushOutcome::Failed(e)
		}
	}
}

async fn delete_remote(ctx: &PushContext, entity: &EntityType, id: RecordId) {
	match ctx.mirror.delete(entity, id).await {
		Ok(()) => {
			ctx.metrics.remote_deletes_total.inc();
			debug!("deleted {} {} from the mirror", entity, id);
		}
		Err(e) => {
			ctx.metrics.remote_delete_failures_total.inc();
			warn!("mirror delete of {} {} failed: {}", entity, id, e);
		}
	}
}

/// Counts jobs that are queued, running or waiting out a backoff.
#[derive(Default)]
struct InFlight {
	count: AtomicUsize,
	idle: Notify,
}

impl InFlight {
	fn begin(&self) {
		self.count.fetch_add(1, Ordering::SeqCst);
	}

	fn end(&self) {
		if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.idle.notify_waiters();
		}
	}

	fn current(&self) -> usize {
		self.count.load(Ordering::SeqCst)
	}

	async fn wait_idle(&self) {
		loop {
			let notified = self.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.current() == 0 {
				return;
			}
			notified.await;
		}
	}
}

/// Marks one in-flight unit finished when dropped, including on panic.
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.0.inflight.end();
	}
}

struct Shared {
	ctx: Arc<PushContext>,
	tx: mpsc::Sender<PropagationJob>,
	inflight: InFlight,
	closed: AtomicBool,
	closing: watch::Sender<bool>,
}

impl Shared {
	fn enqueue(&self, job: PropagationJob) -> SyncResult<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(SyncError::PoolClosed);
		}
		self.inflight.begin();
		match self.tx.try_send(job) {
			Ok(()) => {
				self.ctx.metrics.push_queue_length.inc();
				Ok(())
			}
			Err(TrySendError::Full(_)) => {
				self.inflight.end();
				Err(SyncError::QueueFull)
			}
			Err(TrySendError::Closed(_)) => {
				self.inflight.end();
				Err(SyncError::PoolClosed)
			}
		}
	}

	/// Re-queue a push blocked on a missing relation target after a backoff.
	/// The pending retry counts as in flight until it is queued or cancelled.
	fn schedule_retry(self: &Arc<Self>, entity: EntityType, id: RecordId, attempt: u32) {
		let policy = self.ctx.retry;
		if !policy.allows(attempt) || self.closed.load(Ordering::SeqCst) {
			return;
		}
		if !self.ctx.switch.is_enabled() {
			debug!("sync disabled, not retrying {} {}", entity, id);
			return;
		}
		let delay = policy.delay(attempt);
		let mut closing = self.closing.subscribe();
		self.inflight.begin();
		let guard = InFlightGuard(Arc::clone(self));
		self.ctx.metrics.push_retries_total.inc();
		debug!(
			"retrying {} {} in {:?} (attempt {})",
			entity,
			id,
			delay,
			attempt + 1
		);

		tokio::spawn(async move {
			let shared = &guard.0;
			tokio::select! {
				_ = tokio::time::sleep(delay) => {
					if !shared.ctx.switch.is_enabled() {
						debug!("sync disabled, dropping retry of {} {}", entity, id);
						return;
					}
					let job = PropagationJob::Push { entity: entity.clone(), id, attempt: attempt + 1 };
					if let Err(e) = shared.enqueue(job) {
						warn!("dropping retry of {} {}: {}", entity, id, e);
					}
				}
				_ = closing.wait_for(|c| *c) => {
					debug!("retry of {} {} cancelled by shutdown", entity, id);
				}
			}
		});
	}

	async fn run(self: &Arc<Self>, job: PropagationJob) {
		match job {
			PropagationJob::Push {
				entity,
				id,
				attempt,
			} => {
				// A retry queued before the switch went off.
				if attempt > 0 && !self.ctx.switch.is_enabled() {
					debug!("sync disabled, skipping retry of {} {}", entity, id);
					return;
				}
				if let PushOutcome::Failed(SyncError::UnresolvedDependency { .. }) =
					push_record(&self.ctx, &entity, id).await
				{
					self.schedule_retry(entity, id, attempt);
				}
			}
			PropagationJob::Delete { entity, id } => delete_remote(&self.ctx, &entity, id).await,
		}
	}
}

/// Bounded pool running propagation jobs in the background.
///
/// Jobs travel over a bounded queue to a dispatcher that runs at most
/// `workers` of them at once. Scheduling never waits: when the queue is full
/// the job is refused and the record stays `pending` for the next batch run.
pub struct PushWorkerPool {
	shared: Arc<Shared>,
	shutdown: Arc<Notify>,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PushWorkerPool {
	/// Start the dispatcher. Must be called from within a tokio runtime.
	pub fn start(ctx: PushContext, workers: usize, queue_capacity: usize) -> Self {
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));
		let (closing, _) = watch::channel(false);
		let shared = Arc::new(Shared {
			ctx: Arc::new(ctx),
			tx,
			inflight: InFlight::default(),
			closed: AtomicBool::new(false),
			closing,
		});
		let shutdown = Arc::new(Notify::new());
		let handle = tokio::spawn(dispatch(
			Arc::clone(&shared),
			rx,
			Arc::new(Semaphore::new(workers.max(1))),
			Arc::clone(&shutdown),
		));
		info!(
			"push worker pool started ({} workers, queue capacity {})",
			workers.max(1),
			queue_capacity.max(1)
		);

		Self {
			shared,
			shutdown,
			dispatcher: Mutex::new(Some(handle)),
		}
	}

	/// Queue a job without waiting. Fails with `QueueFull` or `PoolClosed`.
	pub fn schedule(&self, job: PropagationJob) -> SyncResult<()> {
		let res = self.shared.enqueue(job);
		match &res {
			Ok(()) => self.shared.ctx.metrics.push_scheduled_total.inc(),
			Err(_) => self.shared.ctx.metrics.push_dropped_total.inc(),
		}
		res
	}

	/// Jobs queued, running or waiting for a retry.
	pub fn in_flight(&self) -> usize {
		self.shared.inflight.current()
	}

	/// Resolve once every queued, running and delayed job has finished.
	pub async fn wait_idle(&self) {
		self.shared.inflight.wait_idle().await;
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::SeqCst)
	}

	/// Refuse new jobs, cancel pending retries, let queued and running jobs
	/// finish, then stop the dispatcher. Idempotent.
	pub async fn close(&self) {
		self.shared.closed.store(true, Ordering::SeqCst);
		self.shared.closing.send_replace(true);
		self.wait_idle().await;
		self.shutdown.notify_one();
		if let Some(handle) = self.dispatcher.lock().await.take() {
			if let Err(e) = handle.await {
				error!("push dispatcher terminated abnormally: {}", e);
			}
			info!("push worker pool stopped");
		}
	}
}

async fn dispatch(
	shared: Arc<Shared>,
	mut rx: mpsc::Receiver<PropagationJob>,
	permits: Arc<Semaphore>,
	shutdown: Arc<Notify>,
) {
	let mut tasks = JoinSet::new();
	loop {
		let job = tokio::select! {
			biased;
			_ = shutdown.notified() => break,
			job = rx.recv() => match job {
				Some(job) => job,
				None => break,
			},
		};
		// Holding the receiver while all workers are busy is what bounds the
		// queue: senders see `QueueFull` instead of piling up tasks.
		let permit = match Arc::clone(&permits).acquire_owned().await {
			Ok(p) => p,
			Err(_) => break,
		};
		let task_shared = Arc::clone(&shared);
		let done = InFlightGuard(Arc::clone(&shared));
		tasks.spawn(async move {
			// Dropped last, so the permit is free before the job counts as done.
			let _done = done;
			let _permit = permit;
			task_shared.ctx.metrics.push_queue_length.dec();
			task_shared.run(job).await;
		});
		while let Some(res) = tasks.try_join_next() {
			if let Err(e) = res {
				error!("propagation task panicked: {}", e);
			}
		}
	}
	while let Some(res) = tasks.join_next().await {
		if let Err(e) = res {
			error!("propagation task panicked: {}", e);
		}
	}
}
