//! Application state shared across handlers.
//!
//! The store does its own per-stream locking, so handlers share it through a
//! plain `Arc` and hand clones of that `Arc` to blocking tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sensorhub_store::Store;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The stream store.
    pub store: Arc<Store>,
    /// Configuration the service was started with.
    pub config: Config,
    upload_dir: PathBuf,
}

impl AppState {
    /// Create new application state.
    ///
    /// Uploads are spooled to `config.storage.upload_dir()`, which must exist.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let upload_dir = config.storage.upload_dir();
        Arc::new(Self {
            store: Arc::new(store),
            config,
            upload_dir,
        })
    }

    /// Directory uploads are spooled to before ingestion.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}
