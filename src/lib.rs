pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod observability;
pub mod router;
pub mod state;
pub mod store;
pub mod sync;

pub use engine::{EngineOptions, SyncEngine};
pub use error::{SyncError, SyncResult};
