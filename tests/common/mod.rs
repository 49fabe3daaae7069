/// Common test utilities and helpers for integration tests.
use std::env;
use std::sync::Arc;

use masshealth_sync::model::EntityRegistry;
use masshealth_sync::store::MemoryStore;
use masshealth_sync::sync::RetryPolicy;
use masshealth_sync::{EngineOptions, SyncEngine};

/// An engine over two in-memory stores, with handles to both stores so tests
/// can inspect what each side holds.
pub struct Harness {
	pub engine: SyncEngine,
	pub local: Arc<MemoryStore>,
	pub mirror: Arc<MemoryStore>,
}

/// Default options with worker retries disabled, so a push blocked on a
/// missing relation target stays `failed` until a batch run.
#[allow(dead_code)]
pub fn harness() -> Harness {
	harness_with(EngineOptions {
		retry: RetryPolicy::disabled(),
		..EngineOptions::default()
	})
}

#[allow(dead_code)]
pub fn harness_with(options: EngineOptions) -> Harness {
	let local = Arc::new(MemoryStore::local());
	let mirror = Arc::new(MemoryStore::mirror());
	let engine = SyncEngine::new(
		local.clone(),
		mirror.clone(),
		EntityRegistry::masshealth(),
		options,
	);
	Harness {
		engine,
		local,
		mirror,
	}
}

/// Postgres connection string for store tests, from MHS_TEST_DATABASE_URL.
/// Returns None (and logs why) when the variable is unset so the test can
/// return early.
#[allow(dead_code)]
pub fn postgres_url() -> Option<String> {
	match env::var("MHS_TEST_DATABASE_URL") {
		Ok(url) if !url.is_empty() => Some(url),
		_ => {
			eprintln!("Skipping Postgres integration test; set MHS_TEST_DATABASE_URL to enable");
			None
		}
	}
}
