//! Merges registry documents into the cache.
//!
//! Every write is an upsert keyed by registry id, identity hash or
//! (version, blur hash), so ingesting the same document twice converges on
//! the same rows.

use super::documents::{FileDocument, ImageDocument, ModelDocument, VersionDocument};
use crate::config::RegistryConfig;
use crate::error::{Result, SdcmError};
use crate::store::{
    CacheStore, Creator, ImageRecord, ModelFileRecord, ModelRecord, ModelVersionRecord,
};
use chrono::Utc;
use tracing::{debug, info};

/// Result of ingesting one version.
#[derive(Debug, Clone)]
pub struct IngestedVersion {
    pub version: ModelVersionRecord,
    pub primary_file: ModelFileRecord,
}

/// Result of ingesting a full model document.
#[derive(Debug, Clone)]
pub struct IngestedModel {
    pub model: ModelRecord,
    pub versions: Vec<IngestedVersion>,
}

/// Canonical page URL of a version.
pub fn version_page_url(version_id: i64) -> String {
    format!("{}/{}", RegistryConfig::PAGE_BASE, version_id)
}

/// Writes registry documents through a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct RegistryIngestor {
    store: CacheStore,
}

impl RegistryIngestor {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Ingest a model-version document.
    ///
    /// The embedded model summary creates a stub model only if none exists.
    /// A malformed document fails before anything is written.
    pub fn ingest_version(&self, bytes: &[u8]) -> Result<IngestedVersion> {
        let doc: VersionDocument = serde_json::from_slice(bytes)?;
        let model_id = doc.model_id.ok_or_else(|| SdcmError::Ingest {
            message: format!("version {} has no modelId", doc.id),
        })?;

        let stub = stub_model(model_id, &doc);
        if self.store.insert_model_stub(&stub)? {
            debug!("Created model stub {} from version {}", model_id, doc.id);
        }

        self.persist_version(&doc, model_id, bytes.to_vec())
    }

    /// Ingest a full model document: the model itself, its tag set and every
    /// version it lists.
    pub fn ingest_model(&self, bytes: &[u8]) -> Result<IngestedModel> {
        let doc: ModelDocument = serde_json::from_slice(bytes)?;

        let model = ModelRecord {
            id: doc.id,
            name: doc.name.clone(),
            description: doc.description.clone(),
            creator: doc.creator.as_ref().map(|c| Creator {
                username: c.username.clone(),
                image: c.image.clone(),
            }),
            nsfw: doc.nsfw,
            poi: doc.poi,
            kind: doc.kind.clone(),
            mode: doc.mode.clone(),
            original: Some(bytes.to_vec()),
            last_synced_at: Some(Utc::now()),
            withdrawn: false,
        };
        self.store.upsert_model(&model)?;
        self.store.replace_model_tags(doc.id, &doc.tags)?;

        let mut versions = Vec::with_capacity(doc.model_versions.len());
        for version in &doc.model_versions {
            let original = serde_json::to_vec(version)?;
            let model_id = version.model_id.unwrap_or(doc.id);
            versions.push(self.persist_version(version, model_id, original)?);
        }

        info!(
            "Ingested model {} ({}) with {} versions",
            doc.id,
            doc.name,
            versions.len()
        );
        Ok(IngestedModel { model, versions })
    }

    fn persist_version(
        &self,
        doc: &VersionDocument,
        model_id: i64,
        original: Vec<u8>,
    ) -> Result<IngestedVersion> {
        let files: Vec<ModelFileRecord> = doc
            .files
            .iter()
            .enumerate()
            .map(|(index, f)| model_file_record(doc.id, index, f))
            .collect();
        self.store.upsert_model_files(&files)?;

        // Re-read: earlier partial ingests may have left files this document
        // no longer lists.
        let stored_files = self.store.version_files(doc.id)?;
        let primary_file = select_primary(&stored_files)
            .cloned()
            .ok_or_else(|| SdcmError::Ingest {
                message: format!("version {} has no files", doc.id),
            })?;

        let images = doc
            .images
            .iter()
            .map(|img| image_record(doc.id, img))
            .collect::<Result<Vec<_>>>()?;
        self.store.upsert_images(&images)?;
        let stored_images = self.store.version_images(doc.id)?;

        let existing_cover = self
            .store
            .model_version(doc.id)?
            .and_then(|v| v.cover_image_id);
        let cover_image_id = match existing_cover {
            Some(cover) if stored_images.iter().any(|img| img.id == cover) => Some(cover),
            _ => stored_images.first().map(|img| img.id.clone()),
        };

        let version = ModelVersionRecord {
            id: doc.id,
            model_id,
            name: doc.name.clone(),
            prompts: doc.prompts(),
            base_model: doc.base_model.clone(),
            page_url: version_page_url(doc.id),
            download_url: doc.download_url.clone(),
            primary_file_id: Some(primary_file.id),
            cover_image_id,
            original: Some(original),
            registry_created_at: doc.created_at,
            registry_updated_at: doc.updated_at,
            last_synced_at: Some(Utc::now()),
        };
        self.store.upsert_model_version(&version)?;

        debug!(
            "Ingested version {} of model {} (primary file {})",
            doc.id, model_id, primary_file.id
        );
        Ok(IngestedVersion {
            version,
            primary_file,
        })
    }
}

/// The file flagged primary, else the first file.
pub fn select_primary(files: &[ModelFileRecord]) -> Option<&ModelFileRecord> {
    files.iter().find(|f| f.primary).or_else(|| files.first())
}

fn stub_model(model_id: i64, doc: &VersionDocument) -> ModelRecord {
    let brief = doc.model.as_ref();
    ModelRecord {
        id: model_id,
        name: brief.map(|b| b.name.clone()).unwrap_or_default(),
        description: None,
        creator: None,
        nsfw: brief.map(|b| b.nsfw).unwrap_or(false),
        poi: brief.map(|b| b.poi).unwrap_or(false),
        kind: brief.map(|b| b.kind.clone()).unwrap_or_default(),
        mode: brief.and_then(|b| b.mode.clone()),
        original: None,
        last_synced_at: None,
        withdrawn: false,
    }
}

fn model_file_record(version_id: i64, index: usize, file: &FileDocument) -> ModelFileRecord {
    let identity_hash = file.sha256();
    ModelFileRecord {
        id: file
            .id
            .unwrap_or_else(|| synthesize_file_id(version_id, index, identity_hash.as_deref())),
        version_id,
        name: file.name.clone().unwrap_or_default(),
        size: file.size_bytes(),
        kind: file.kind.clone(),
        identity_hash,
        metadata: file.metadata.clone(),
        hashes: file
            .hashes
            .as_ref()
            .and_then(|h| serde_json::to_value(h).ok()),
        primary: file.primary.unwrap_or(false),
        download_url: file.download_url.clone(),
    }
}

/// Local id for a file the registry sent without one. Negative so it can
/// never collide with a registry id. Derived from the hash when there is
/// one, otherwise from the file's position in its version, so re-ingests
/// of the same document agree.
fn synthesize_file_id(version_id: i64, index: usize, hash: Option<&str>) -> i64 {
    let from_hash = hash
        .and_then(|h| h.get(..15))
        .and_then(|prefix| i64::from_str_radix(prefix, 16).ok());
    match from_hash {
        Some(n) => -(n + 1),
        None => {
            let slot = i64::try_from(index).unwrap_or(i64::from(u16::MAX)) & 0xFFFF;
            -(version_id.saturating_mul(1 << 16).saturating_add(slot) + 1)
        }
    }
}

fn image_record(version_id: i64, image: &ImageDocument) -> Result<ImageRecord> {
    let raw_meta = image.meta.as_ref().map(serde_json::to_vec).transpose()?;
    Ok(ImageRecord {
        id: ImageRecord::generate_id(),
        version_id,
        blur_hash: image.blur_key(),
        local_path: None,
        fingerprint: None,
        download_url: image.url.clone(),
        width: image.width,
        height: image.height,
        nsfw: image.nsfw_level(),
        meta: image.meta.clone(),
        raw_meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version_doc(name: &str, files: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": 200,
            "modelId": 20,
            "name": name,
            "baseModel": "SD 1.5",
            "trainedWords": ["detailed, sharp", "hdr"],
            "model": {"name": "Detail Tweaker", "type": "LORA", "nsfw": false, "poi": false},
            "files": files,
            "images": [
                {"url": "https://img/1.jpeg", "nsfw": "None", "width": 512, "height": 768, "hash": "UAA"},
                {"url": "https://img/2.jpeg", "nsfw": "Soft", "width": 512, "height": 768, "hash": "UBB"}
            ]
        }))
        .unwrap()
    }

    fn files(primary: [bool; 3]) -> serde_json::Value {
        json!([
            {"id": 1, "name": "a.safetensors", "sizeKB": 100.0, "primary": primary[0], "hashes": {"SHA256": "aa"}},
            {"id": 2, "name": "b.safetensors", "sizeKB": 100.0, "primary": primary[1], "hashes": {"SHA256": "bb"}},
            {"id": 3, "name": "c.zip", "sizeKB": 100.0, "primary": primary[2], "hashes": {"SHA256": "cc"}}
        ])
    }

    #[test]
    fn test_flagged_primary_wins() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        let ingested = ingestor
            .ingest_version(&version_doc("v1", files([false, true, false])))
            .unwrap();
        assert_eq!(ingested.primary_file.id, 2);
        assert_eq!(ingested.version.primary_file_id, Some(2));
        assert_eq!(ingested.primary_file.identity_hash.as_deref(), Some("BB"));
    }

    #[test]
    fn test_first_file_when_none_flagged() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store);
        let doc = version_doc(
            "v1",
            json!([
                {"id": 7, "name": "x.safetensors", "sizeKB": 1.0, "primary": false},
                {"id": 8, "name": "y.safetensors", "sizeKB": 1.0, "primary": false}
            ]),
        );
        let ingested = ingestor.ingest_version(&doc).unwrap();
        assert_eq!(ingested.primary_file.id, 7);
    }

    #[test]
    fn test_zero_files_is_ingest_error() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store);
        assert!(matches!(
            ingestor.ingest_version(&version_doc("v1", json!([]))),
            Err(SdcmError::Ingest { .. })
        ));
    }

    #[test]
    fn test_reingest_converges() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        ingestor
            .ingest_version(&version_doc("first", files([true, false, false])))
            .unwrap();
        ingestor
            .ingest_version(&version_doc("second", files([true, false, false])))
            .unwrap();

        let version = store.model_version(200).unwrap().unwrap();
        assert_eq!(version.name, "second");
        assert_eq!(version.prompts, vec!["detailed", "sharp", "hdr"]);
        assert_eq!(version.page_url, "https://civitai.com/api/v1/model-versions/200");
        assert_eq!(store.version_files(200).unwrap().len(), 3);
        assert_eq!(store.version_images(200).unwrap().len(), 2);
        assert_eq!(store.model(20).unwrap().unwrap().name, "Detail Tweaker");
    }

    #[test]
    fn test_malformed_document_writes_nothing() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        assert!(matches!(
            ingestor.ingest_version(b"{\"id\": \"not a number\""),
            Err(SdcmError::Json { .. })
        ));
        assert!(store.model(20).unwrap().is_none());
    }

    #[test]
    fn test_cover_override_survives_reingest() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        let doc = version_doc("v1", files([true, false, false]));
        let first = ingestor.ingest_version(&doc).unwrap();

        let images = store.version_images(200).unwrap();
        assert_eq!(first.version.cover_image_id.as_ref(), Some(&images[0].id));
        store.set_version_cover(200, &images[1].id).unwrap();

        ingestor.ingest_version(&doc).unwrap();
        let version = store.model_version(200).unwrap().unwrap();
        assert_eq!(version.cover_image_id.as_ref(), Some(&images[1].id));
    }

    #[test]
    fn test_full_model_ingest() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        let doc = serde_json::to_vec(&json!({
            "id": 20,
            "name": "Detail Tweaker",
            "type": "LORA",
            "nsfw": false,
            "tags": ["detail", "tool"],
            "creator": {"username": "someone", "image": null},
            "modelVersions": [
                {"id": 201, "name": "v2", "files": [{"id": 11, "sizeKB": 2.0, "hashes": {"SHA256": "d1"}}]},
                {"id": 200, "name": "v1", "files": [{"id": 10, "sizeKB": 2.0, "hashes": {"SHA256": "d0"}}]}
            ]
        }))
        .unwrap();

        let ingested = ingestor.ingest_model(&doc).unwrap();
        assert_eq!(ingested.versions.len(), 2);

        let model = store.model(20).unwrap().unwrap();
        assert!(model.last_synced_at.is_some());
        assert_eq!(model.creator.unwrap().username, "someone");
        assert_eq!(store.model_tags(20).unwrap(), vec!["detail", "tool"]);

        let version = store.model_version(201).unwrap().unwrap();
        assert_eq!(version.model_id, 20);
        let original: serde_json::Value =
            serde_json::from_slice(version.original.as_deref().unwrap()).unwrap();
        assert_eq!(original["name"], "v2");
        assert_eq!(
            store.resolve_model_by_hash("D1").unwrap().unwrap().version_id,
            201
        );
    }

    #[test]
    fn test_new_version_reusing_a_cached_hash() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        ingestor
            .ingest_version(&version_doc("v1", files([true, false, false])))
            .unwrap();

        let reupload = serde_json::to_vec(&json!({
            "id": 201,
            "modelId": 20,
            "name": "v1 reupload",
            "files": [{"id": 99, "name": "a.safetensors", "sizeKB": 100.0, "hashes": {"SHA256": "aa"}}]
        }))
        .unwrap();
        let ingested = ingestor.ingest_version(&reupload).unwrap();

        assert_eq!(ingested.primary_file.identity_hash.as_deref(), Some("AA"));
        assert_eq!(ingested.primary_file.version_id, 201);
        assert_eq!(store.version_files(201).unwrap().len(), 1);
        assert_eq!(store.version_files(200).unwrap().len(), 2);
        assert_eq!(
            store.resolve_model_by_hash("AA").unwrap().unwrap().version_id,
            201
        );
    }

    #[test]
    fn test_hashless_files_keep_their_rows_across_reingest() {
        let store = CacheStore::in_memory().unwrap();
        let ingestor = RegistryIngestor::new(store.clone());
        let doc = version_doc(
            "v1",
            json!([
                {"name": "x.safetensors", "sizeKB": 1.0},
                {"name": "y.safetensors", "sizeKB": 1.0}
            ]),
        );
        let first = ingestor.ingest_version(&doc).unwrap();
        let second = ingestor.ingest_version(&doc).unwrap();

        let stored = store.version_files(200).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|f| f.id < 0));
        assert_eq!(first.primary_file.id, second.primary_file.id);
        assert_eq!(stored[0].name, "x.safetensors");
    }
}
