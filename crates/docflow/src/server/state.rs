//! Application state for the docflow server

use std::sync::Arc;

use crate::config::DocflowConfig;
use crate::hub::NotificationHub;
use crate::processing::TaskOrchestrator;
use crate::storage::RecordStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: DocflowConfig,
    store: Arc<RecordStore>,
    hub: Arc<NotificationHub>,
    orchestrator: Arc<TaskOrchestrator>,
}

impl AppState {
    /// Wrap the components built at startup
    pub fn new(
        config: DocflowConfig,
        store: Arc<RecordStore>,
        hub: Arc<NotificationHub>,
        orchestrator: Arc<TaskOrchestrator>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                hub,
                orchestrator,
            }),
        }
    }

    pub fn config(&self) -> &DocflowConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.inner.hub
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.inner.orchestrator
    }
}
