//! Row types persisted by [`CacheStore`](super::CacheStore).

use crate::identity::ContentIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One physical file known to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// `F` followed by a simple-form UUID.
    pub id: String,
    pub path: PathBuf,
    /// Uppercase SHA-256. Never changes once written.
    pub hash: String,
    pub crc32: String,
    pub name: String,
    pub thumbnail_path: Option<PathBuf>,
    pub thumbnail_fingerprint: Option<String>,
    pub descriptor_path: Option<PathBuf>,
    pub size: u64,
    pub memo: Option<String>,
    pub prompts: Vec<String>,
    pub base_model: Option<String>,
    pub related_version_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A fresh record for `path` with the given content identity.
    pub fn new(path: &Path, identity: &ContentIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: format!("F{}", uuid::Uuid::new_v4().simple()),
            path: path.to_path_buf(),
            hash: identity.sha256.clone(),
            crc32: identity.crc32.clone(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            thumbnail_path: None,
            thumbnail_fingerprint: None,
            descriptor_path: None,
            size: identity.size,
            memo: None,
            prompts: Vec::new(),
            base_model: None,
            related_version_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registry user credited as a model's creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub username: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub creator: Option<Creator>,
    pub nsfw: bool,
    pub poi: bool,
    pub kind: String,
    pub mode: Option<String>,
    #[serde(skip)]
    pub original: Option<Vec<u8>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub withdrawn: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersionRecord {
    pub id: i64,
    pub model_id: i64,
    pub name: String,
    pub prompts: Vec<String>,
    pub base_model: Option<String>,
    pub page_url: String,
    pub download_url: Option<String>,
    pub primary_file_id: Option<i64>,
    pub cover_image_id: Option<String>,
    #[serde(skip)]
    pub original: Option<Vec<u8>>,
    pub registry_created_at: Option<DateTime<Utc>>,
    pub registry_updated_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFileRecord {
    pub id: i64,
    pub version_id: i64,
    pub name: String,
    pub size: u64,
    pub kind: Option<String>,
    /// Uppercase SHA-256 declared by the registry; joins to [`FileRecord::hash`].
    pub identity_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub hashes: Option<serde_json::Value>,
    pub primary: bool,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// `IM` followed by a simple-form UUID.
    pub id: String,
    pub version_id: i64,
    pub blur_hash: String,
    pub local_path: Option<PathBuf>,
    pub fingerprint: Option<String>,
    pub download_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 0 none, 1 soft, 2 mature, 3 x, -1 unknown.
    pub nsfw: i32,
    pub meta: Option<serde_json::Value>,
    #[serde(skip)]
    pub raw_meta: Option<Vec<u8>>,
}

impl ImageRecord {
    pub fn generate_id() -> String {
        format!("IM{}", uuid::Uuid::new_v4().simple())
    }
}

/// A cached file joined with whatever registry metadata describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    /// Model name when known, otherwise the file name.
    pub name: String,
    pub version_name: Option<String>,
    pub nsfw: bool,
    pub file_path: PathBuf,
    pub kind: Option<String>,
    pub thumbnail_path: Option<PathBuf>,
    pub file_hash: String,
    /// Registry activation prompts followed by user-added ones.
    pub prompts: Vec<String>,
    pub memo: Option<String>,
    pub base_model: Option<String>,
    pub related: bool,
    pub related_model: Option<i64>,
    pub related_version: Option<i64>,
}

/// A model file identity resolved to its version and model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModel {
    pub model_id: i64,
    pub model_name: String,
    pub version_id: i64,
    pub version_name: String,
}

/// A version together with its owning model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionWithModel {
    pub version: ModelVersionRecord,
    pub model: Option<ModelRecord>,
}
