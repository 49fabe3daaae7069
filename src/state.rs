use std::sync::Arc;

use crate::engine::SyncEngine;

/// Application state passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<SyncEngine>,
}

impl AppState {
	pub fn new(engine: Arc<SyncEngine>) -> Self {
		Self { engine }
	}
}
