//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::live::SessionCoordinator;
use checkpoint_core::ports::StoreService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. All live-session mutations flow through the coordinator; the
/// store is reached directly only by the editor/report REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreService>,
    pub config: Arc<Config>,
    pub coordinator: Arc<SessionCoordinator>,
}
