//! HTTP API for the chat UI

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    /// Local store, when leads are kept in SQLite
    pub store: Option<Database>,
}

impl AppState {
    pub fn new(runtime: Arc<RuntimeManager>, store: Option<Database>) -> Self {
        Self { runtime, store }
    }
}
