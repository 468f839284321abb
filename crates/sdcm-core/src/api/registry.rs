//! On-demand registry refreshes and cached metadata lookups.

use crate::companion::descriptor_path_for;
use crate::error::{Result, SdcmError};
use crate::identity::fingerprint_image_async;
use crate::registry::{IngestedModel, IngestedVersion, RegistryResponse};
use crate::store::{ImageRecord, ModelFileRecord, ModelVersionRecord, VersionWithModel};
use crate::SdcmApi;
use std::path::PathBuf;
use tracing::{debug, info, warn};

impl SdcmApi {
    /// Fetch and ingest one model.
    ///
    /// A model the registry no longer serves is flagged withdrawn and
    /// reported as [`SdcmError::NotFound`].
    pub async fn refresh_model(&self, model_id: i64) -> Result<IngestedModel> {
        match self.client.fetch_model(model_id).await? {
            RegistryResponse::NotFound => {
                warn!("Model {} is gone from the registry", model_id);
                if self.store.model(model_id)?.is_some() {
                    self.store.mark_model_withdrawn(model_id)?;
                }
                Err(SdcmError::not_found("registry model", model_id))
            }
            RegistryResponse::Found(bytes) => {
                let ingestor = self.ingestor.clone();
                let ingested =
                    tokio::task::spawn_blocking(move || ingestor.ingest_model(&bytes)).await??;
                info!(
                    "Refreshed model {} ({} versions)",
                    model_id,
                    ingested.versions.len()
                );
                Ok(ingested)
            }
        }
    }

    /// Look up the version that declares a file hash, ingest it, write its
    /// descriptor next to every cached file with that hash and link those
    /// files to it.
    pub async fn refresh_by_hash(&self, hash: &str) -> Result<IngestedVersion> {
        let hash = hash.trim().to_uppercase();
        let bytes = match self.client.fetch_version_by_hash(&hash).await? {
            RegistryResponse::Found(bytes) => bytes,
            RegistryResponse::NotFound => {
                return Err(SdcmError::not_found("registry version for hash", &hash));
            }
        };

        let ingestor = self.ingestor.clone();
        let document = bytes.clone();
        let ingested =
            tokio::task::spawn_blocking(move || ingestor.ingest_version(&document)).await??;

        for record in self.store.file_records_by_hash(&hash)? {
            let descriptor = descriptor_path_for(&record.path);
            tokio::fs::write(&descriptor, &bytes)
                .await
                .map_err(|e| SdcmError::io_with_path(e, &descriptor))?;
            self.store.update_file_location(
                &record.id,
                &record.path,
                record.thumbnail_path.as_deref(),
                Some(&descriptor),
            )?;
        }
        let linked = self.store.link_files_to_version(&hash, ingested.version.id)?;
        info!(
            "Hash {} is version {}; linked {} files",
            hash, ingested.version.id, linked
        );
        Ok(ingested)
    }

    /// Download a gallery image into the image directory, fingerprint it
    /// and record its local path.
    ///
    /// An image whose recorded local copy still exists is returned as is.
    pub async fn download_gallery_image(&self, image_id: &str) -> Result<ImageRecord> {
        let image = self
            .store
            .image(image_id)?
            .ok_or_else(|| SdcmError::not_found("image", image_id))?;
        if image.local_path.as_ref().is_some_and(|p| p.exists()) {
            debug!("Image {} already downloaded", image_id);
            return Ok(image);
        }

        let image_dir = self.image_dir.as_ref().ok_or_else(|| SdcmError::Config {
            message: "no image directory configured".into(),
        })?;
        let bytes = match self.client.fetch_image(&image.download_url).await? {
            RegistryResponse::Found(bytes) => bytes,
            RegistryResponse::NotFound => {
                return Err(SdcmError::not_found("registry image", &image.download_url));
            }
        };
        let format = image::guess_format(&bytes).map_err(|e| SdcmError::Image {
            path: PathBuf::from(&image.download_url),
            message: e.to_string(),
        })?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");

        let dir = image_dir.join(image.version_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SdcmError::io_with_path(e, &dir))?;
        let path = dir.join(format!("{}.{}", image.id, extension));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| SdcmError::io_with_path(e, &path))?;

        let fingerprint = match fingerprint_image_async(&path).await {
            Ok(fp) => fp,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove {}: {}", path.display(), remove);
                }
                return Err(e);
            }
        };
        self.store
            .set_image_local(&image.id, &path, Some(&fingerprint))?;
        info!("Downloaded image {} to {}", image.id, path.display());

        self.store
            .image(image_id)?
            .ok_or_else(|| SdcmError::not_found("image", image_id))
    }

    /// A cached version with its model.
    pub fn version(&self, version_id: i64) -> Result<VersionWithModel> {
        self.store
            .version_with_model(version_id)?
            .ok_or_else(|| SdcmError::not_found("model version", version_id))
    }

    /// Other cached versions of the same model.
    pub fn sibling_versions(&self, version_id: i64) -> Result<Vec<ModelVersionRecord>> {
        self.store.sibling_versions(version_id)
    }

    pub fn version_files(&self, version_id: i64) -> Result<Vec<ModelFileRecord>> {
        self.store.version_files(version_id)
    }

    pub fn version_images(&self, version_id: i64) -> Result<Vec<ImageRecord>> {
        self.store.version_images(version_id)
    }

    pub fn model_tags(&self, model_id: i64) -> Result<Vec<String>> {
        self.store.model_tags(model_id)
    }
}
