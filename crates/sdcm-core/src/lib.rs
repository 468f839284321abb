//! sdcm core - scan, identify and reconcile engine for local Stable
//! Diffusion model libraries.
//!
//! The engine walks the model directories of WebUI and ComfyUI
//! installations, identifies files by content hash, picks up companion
//! thumbnails and registry descriptors, merges registry metadata into a
//! SQLite cache and finds duplicate content across the whole library.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdcm_core::{CancellationToken, LibraryConfig, ModelKind, SdcmApi, UiTool};
//!
//! #[tokio::main]
//! async fn main() -> sdcm_core::Result<()> {
//!     let config = LibraryConfig::load("sdcm.json".as_ref())?;
//!     let api = SdcmApi::builder(config).database("cache.db").build()?;
//!
//!     let cancel = CancellationToken::new();
//!     let loras = api
//!         .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
//!         .await?;
//!     println!("{} LoRA files", loras.len());
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod companion;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod events;
pub mod file_ops;
pub mod identity;
pub mod layout;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod store;
pub mod sync;

mod api;

// Re-export commonly used types
pub use api::SdcmApiBuilder;
pub use cancel::{CancellationToken, CancelledError};
pub use companion::{resolve_companions, Companions};
pub use config::{ComfyUiPaths, LibraryConfig, ScanSettings, SyncSettings, WebUiPaths};
pub use duplicates::{DuplicateDetector, DuplicateGroup, DuplicateMember};
pub use error::{Result, SdcmError};
pub use events::{Event, EventBus, ScanEvent, ScanState, SyncEvent, SyncStatus};
pub use file_ops::FileOps;
pub use identity::{compute_identity, fingerprint_image, ContentIdentity};
pub use layout::{ModelDirectoryResolver, ModelKind, UiTool};
pub use registry::{CivitaiClient, IngestedModel, IngestedVersion, RegistryClient, RegistryIngestor};
pub use retry::RetryPolicy;
pub use scan::{FullScanReport, ScanOrchestrator};
pub use store::{CacheStore, FileRecord, FileSummary, ModelRecord, ModelVersionRecord};
pub use sync::{RemoteSyncScheduler, SyncReport};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main entry point for sdcm operations.
///
/// Owns one cache store, one event bus and one registry client, and hands
/// them to every component. Cheap to clone.
#[derive(Clone)]
pub struct SdcmApi {
    config: Arc<LibraryConfig>,
    store: CacheStore,
    events: EventBus,
    client: Arc<dyn RegistryClient>,
    ingestor: RegistryIngestor,
    scanner: ScanOrchestrator,
    duplicates: DuplicateDetector,
    sync: RemoteSyncScheduler,
    files: FileOps,
    image_dir: Option<PathBuf>,
}

impl std::fmt::Debug for SdcmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdcmApi")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl SdcmApi {
    /// Start building an API over `config`.
    pub fn builder(config: LibraryConfig) -> SdcmApiBuilder {
        SdcmApiBuilder::new(config)
    }

    /// Wire up every component around an existing store and client.
    pub fn new(
        config: Arc<LibraryConfig>,
        store: CacheStore,
        events: EventBus,
        client: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            ingestor: RegistryIngestor::new(store.clone()),
            scanner: ScanOrchestrator::new(config.clone(), store.clone(), events.clone()),
            duplicates: DuplicateDetector::new(config.clone(), store.clone(), events.clone()),
            sync: RemoteSyncScheduler::new(
                config.clone(),
                store.clone(),
                client.clone(),
                events.clone(),
            ),
            files: FileOps::new(store.clone()),
            image_dir: None,
            config,
            store,
            events,
            client,
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to scan and sync events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn files(&self) -> &FileOps {
        &self.files
    }

    /// Directory downloaded gallery images are written to.
    pub fn image_dir(&self) -> Option<&Path> {
        self.image_dir.as_deref()
    }

    pub(crate) fn with_image_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.image_dir = dir;
        self
    }
}
