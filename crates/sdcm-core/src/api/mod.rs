//! [`SdcmApi`] construction and operations, split by area.

mod files;
mod library;
mod registry;

use crate::config::LibraryConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::registry::{CivitaiClient, RegistryClient};
use crate::store::CacheStore;
use crate::SdcmApi;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for configuring [`SdcmApi`] initialization.
///
/// # Example
///
/// ```rust,ignore
/// let api = SdcmApi::builder(config)
///     .database("/var/lib/sdcm/cache.db")
///     .build()?;
/// ```
pub struct SdcmApiBuilder {
    config: LibraryConfig,
    database: Option<PathBuf>,
    client: Option<Arc<dyn RegistryClient>>,
    events: Option<EventBus>,
    image_dir: Option<PathBuf>,
}

impl SdcmApiBuilder {
    pub fn new(config: LibraryConfig) -> Self {
        Self {
            config,
            database: None,
            client: None,
            events: None,
            image_dir: None,
        }
    }

    /// Cache database file. Without one the cache lives in memory.
    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Where downloaded gallery images go. Defaults to an `images`
    /// directory next to the database; an in-memory cache has none.
    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    /// Registry client to use instead of the Civitai HTTP client.
    pub fn with_client(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Share an existing event bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<SdcmApi> {
        self.config.validate()?;

        let store = match &self.database {
            Some(path) => CacheStore::open(path)?,
            None => CacheStore::in_memory()?,
        }
        .with_path_batch_size(self.config.scan.path_batch_size);

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(CivitaiClient::new(&self.config)?) as Arc<dyn RegistryClient>,
        };

        info!(
            "sdcm ready (database: {})",
            self.database
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string())
        );

        let image_dir = self.image_dir.or_else(|| {
            self.database
                .as_ref()
                .and_then(|db| db.parent())
                .map(|dir| dir.join("images"))
        });

        Ok(SdcmApi::new(
            Arc::new(self.config),
            store,
            self.events.unwrap_or_default(),
            client,
        )
        .with_image_dir(image_dir))
    }
}
