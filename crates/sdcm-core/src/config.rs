//! Configuration for the sdcm engine.
//!
//! Constants live on zero-sized config structs; per-installation settings
//! (tool directories, proxy, tunables) live in [`LibraryConfig`], which is
//! loaded once at startup and passed explicitly to every component.

use crate::error::{Result, SdcmError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filesystem conventions used while scanning.
pub struct ScanConfig;

impl ScanConfig {
    /// Lower-cased extensions (with dot) that identify model files.
    pub const MODEL_EXTENSIONS: &'static [&'static str] =
        &[".safetensors", ".pt", ".pth", ".pickle", ".ckpt"];
    /// Lower-cased suffixes that identify thumbnail companions.
    pub const THUMBNAIL_EXTENSIONS: &'static [&'static str] = &[".png", ".jpg", ".webp"];
    /// Infix placed between the model base name and the thumbnail extension.
    pub const PREVIEW_INFIX: &'static str = ".preview";
    /// Suffix of registry descriptor companions.
    pub const DESCRIPTOR_SUFFIX: &'static str = ".civitai.info";
    /// Max number of paths per `IN (...)` query.
    pub const PATH_BATCH_SIZE: usize = 50;
    /// Default number of concurrent scan workers.
    pub const DEFAULT_CONCURRENCY: usize = 10;
    /// Read buffer for content hashing (8MB).
    pub const HASH_CHUNK_SIZE: usize = 8 * 1024 * 1024;
}

/// Remote registry constants.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const PAGE_BASE: &'static str = "https://civitai.com/api/v1/model-versions";
    pub const USER_AGENT: &'static str = "sdcm/0.3";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_SYNC_CONCURRENCY: usize = 5;
    pub const DEFAULT_STALE_AFTER_DAYS: i64 = 30;
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 5;
    pub const DEFAULT_TASK_COOLDOWN_SECS: u64 = 5;
    /// Growth factor of the retry backoff.
    pub const RETRY_EXPONENTIAL_BASE: f64 = 3.0;
}

/// Model directories of a Stable Diffusion WebUI (A1111) installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebUiPaths {
    pub base_path: PathBuf,
    pub checkpoint: PathBuf,
    pub configuration: PathBuf,
    pub lora: PathBuf,
    pub locon: PathBuf,
    pub vae: PathBuf,
    pub embedding: PathBuf,
    pub hypernet: PathBuf,
    pub controlnet: PathBuf,
    pub esrgan: PathBuf,
    pub real_esrgan: PathBuf,
    #[serde(rename = "swinIR")]
    pub swin_ir: PathBuf,
}

/// Model directories of a ComfyUI installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComfyUiPaths {
    pub base_path: PathBuf,
    pub checkpoint: PathBuf,
    pub clip: PathBuf,
    pub clip_vision: PathBuf,
    pub configuration: PathBuf,
    pub diffuser: PathBuf,
    pub embedding: PathBuf,
    pub gligen: PathBuf,
    pub hypernet: PathBuf,
    pub lora: PathBuf,
    pub locon: PathBuf,
    pub unet: PathBuf,
    pub upscaler: PathBuf,
    pub vae: PathBuf,
    pub controlnet: PathBuf,
}

/// Tunables for scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSettings {
    /// Max simultaneous per-file workers.
    pub concurrency: usize,
    /// Paths per batched store query.
    pub path_batch_size: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: ScanConfig::DEFAULT_CONCURRENCY,
            path_batch_size: ScanConfig::PATH_BATCH_SIZE,
        }
    }
}

/// Tunables for the remote metadata refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub concurrency: usize,
    pub stale_after_days: i64,
    pub retry_attempts: u32,
    pub retry_base_delay_secs: u64,
    /// Pause a worker holds its slot for after each model, to stay polite
    /// with the registry.
    pub task_cooldown_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: RegistryConfig::DEFAULT_SYNC_CONCURRENCY,
            stale_after_days: RegistryConfig::DEFAULT_STALE_AFTER_DAYS,
            retry_attempts: RegistryConfig::DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_secs: RegistryConfig::DEFAULT_RETRY_BASE_DELAY_SECS,
            task_cooldown_secs: RegistryConfig::DEFAULT_TASK_COOLDOWN_SECS,
        }
    }
}

impl SyncSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn task_cooldown(&self) -> Duration {
        Duration::from_secs(self.task_cooldown_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.stale_after_days)
    }
}

/// Per-installation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    pub web_ui: Option<WebUiPaths>,
    pub comfy_ui: Option<ComfyUiPaths>,
    /// Proxy URL used for registry requests, e.g. `http://127.0.0.1:7890`.
    pub proxy: Option<String>,
    pub registry_base_url: String,
    pub scan: ScanSettings,
    pub sync: SyncSettings,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            web_ui: None,
            comfy_ui: None,
            proxy: None,
            registry_base_url: RegistryConfig::API_BASE.to_string(),
            scan: ScanSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl LibraryConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(SdcmError::io_with_path(e, path)),
        };
        let config: Self = serde_json::from_slice(&content).map_err(|e| SdcmError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject tunables that would stall the worker pools.
    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            return Err(SdcmError::Validation {
                field: "scan.concurrency".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.scan.path_batch_size == 0 {
            return Err(SdcmError::Validation {
                field: "scan.pathBatchSize".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.sync.concurrency == 0 {
            return Err(SdcmError::Validation {
                field: "sync.concurrency".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
