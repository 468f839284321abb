//! Companion file discovery.
//!
//! Companions share the model's base name: `<base>.preview.png` style
//! thumbnails and `<base>.civitai.info` descriptors. Sibling names are sorted
//! before classification and the last match of each kind wins, so the result
//! does not depend on the filesystem's listing order.

use crate::config::ScanConfig;
use crate::error::{Result, SdcmError};
use std::path::{Path, PathBuf};

/// Companion files found next to a model file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Companions {
    pub thumbnail: Option<PathBuf>,
    pub descriptor: Option<PathBuf>,
}

impl Companions {
    pub fn is_empty(&self) -> bool {
        self.thumbnail.is_none() && self.descriptor.is_none()
    }
}

/// Find the thumbnail and descriptor companions of `path`.
///
/// Fails if `path` does not exist or its directory cannot be listed.
pub fn resolve_companions(path: impl AsRef<Path>) -> Result<Companions> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SdcmError::FileNotFound(path.to_path_buf()));
    }
    let dir = path
        .parent()
        .ok_or_else(|| SdcmError::NotADirectory(path.to_path_buf()))?;
    let base = base_name(path).to_lowercase();

    let entries = std::fs::read_dir(dir).map_err(|e| SdcmError::io_with_path(e, dir))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SdcmError::io_with_path(e, dir))?;
        let is_file = entry.file_type().map(|t| !t.is_dir()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut companions = Companions::default();
    for name in names {
        let lowered = name.to_lowercase();
        if !lowered.starts_with(&base) {
            continue;
        }
        if ScanConfig::THUMBNAIL_EXTENSIONS
            .iter()
            .any(|ext| lowered.ends_with(ext))
        {
            companions.thumbnail = Some(dir.join(&name));
        } else if lowered.ends_with(ScanConfig::DESCRIPTOR_SUFFIX) {
            companions.descriptor = Some(dir.join(&name));
        }
    }
    Ok(companions)
}

/// Resolve companions on the blocking thread pool.
pub async fn resolve_companions_async(path: impl AsRef<Path>) -> Result<Companions> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || resolve_companions(&path)).await?
}

/// File name without its final extension.
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Conventional thumbnail path for a model file, e.g. `a.preview.png`.
///
/// `ext` is given without the leading dot.
pub fn thumbnail_path_for(model: &Path, ext: &str) -> PathBuf {
    model.with_file_name(format!(
        "{}{}.{}",
        base_name(model),
        ScanConfig::PREVIEW_INFIX,
        ext.to_lowercase()
    ))
}

/// Conventional descriptor path for a model file.
pub fn descriptor_path_for(model: &Path) -> PathBuf {
    model.with_file_name(format!(
        "{}{}",
        base_name(model),
        ScanConfig::DESCRIPTOR_SUFFIX
    ))
}
