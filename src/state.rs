//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::tools::ActionClient;
use crate::store::SessionStore;

/// State shared across all connections, wrapped in `Arc` by the router.
pub struct AppState {
    pub config: ServerConfig,
    /// HTTP client for the external data-action service.
    pub actions: Arc<ActionClient>,
    /// Recently completed sessions, kept for outcome inspection.
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let actions = Arc::new(ActionClient::new(config.action_service.clone()));
        let sessions = SessionStore::new(config.session_store_ttl_secs);
        Self {
            config,
            actions,
            sessions,
        }
    }
}
