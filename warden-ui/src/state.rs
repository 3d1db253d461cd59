//! Shared application state for the monitor server.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::routes::StatusPayload;

/// Events broadcast to SSE clients.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// The shared store file was written.
    StoreChanged,
    /// The settings file was written.
    ConfigChanged,
    /// The enforcer rules file was written.
    RulesChanged,
    /// Periodic status payload for badge rendering.
    Status(StatusPayload),
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root directory of the project (contains .warden/).
    pub project_dir: PathBuf,
    /// Broadcast sender for change and status events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(project_dir: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            project_dir,
            event_tx: Arc::new(event_tx),
        }
    }

    /// Path to the .warden/ directory.
    pub fn warden_dir(&self) -> PathBuf {
        self.project_dir.join(".warden")
    }

    /// Path to the shared store file.
    pub fn store_path(&self) -> PathBuf {
        self.warden_dir().join("store.json")
    }

    /// Path to config.toml.
    pub fn config_path(&self) -> PathBuf {
        self.warden_dir().join("config.toml")
    }

    /// Path to the enforcer rules file.
    pub fn rules_path(&self) -> PathBuf {
        self.warden_dir().join("rules.json")
    }
}
