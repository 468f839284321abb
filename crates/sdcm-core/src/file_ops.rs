//! User-issued maintenance of cached files: rename, delete, annotations and
//! thumbnails.
//!
//! These are the only operations that move or remove files on disk. Each
//! touches the disk first and writes the record last, so a failed disk step
//! leaves the record as it was.

use crate::companion::{resolve_companions, thumbnail_path_for, descriptor_path_for};
use crate::error::{Result, SdcmError};
use crate::identity::fingerprint_image;
use crate::store::{CacheStore, FileRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Split a comma-separated prompt string into trimmed, non-empty prompts.
fn split_prompts(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Append `additions` to `existing`, skipping prompts already present.
pub fn merge_prompts(existing: &[String], additions: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len());
    for prompt in existing.iter().cloned().chain(split_prompts(additions)) {
        if !merged.contains(&prompt) {
            merged.push(prompt);
        }
    }
    merged
}

/// Maintenance operations over cached files.
#[derive(Debug, Clone)]
pub struct FileOps {
    store: CacheStore,
}

impl FileOps {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    fn record(&self, id: &str) -> Result<FileRecord> {
        self.store
            .file_record(id)?
            .ok_or_else(|| SdcmError::not_found("file record", id))
    }

    /// Rename a model file and its companions to `new_stem`.
    ///
    /// The thumbnail becomes `<new_stem>.preview.<ext>` and the descriptor
    /// `<new_stem>.civitai.info`. If any rename fails the ones already done
    /// are undone and the record is left untouched.
    pub fn rename_file(&self, id: &str, new_stem: &str) -> Result<FileRecord> {
        let new_stem = new_stem.trim();
        if new_stem.is_empty() || new_stem.contains(['/', '\\']) {
            return Err(SdcmError::Validation {
                field: "name".into(),
                message: format!("{:?} is not a valid file name", new_stem),
            });
        }

        let record = self.record(id)?;
        if !record.path.exists() {
            return Err(SdcmError::FileNotFound(record.path));
        }

        let new_path = match record.path.extension() {
            Some(ext) => record
                .path
                .with_file_name(format!("{}.{}", new_stem, ext.to_string_lossy())),
            None => record.path.with_file_name(new_stem),
        };
        if new_path == record.path {
            return Ok(record);
        }

        let mut moves = vec![(record.path.clone(), new_path.clone())];
        let new_thumbnail = record
            .thumbnail_path
            .as_ref()
            .filter(|p| p.exists())
            .map(|old| {
                let ext = old
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let new = thumbnail_path_for(&new_path, &ext);
                moves.push((old.clone(), new.clone()));
                new
            });
        let new_descriptor = record
            .descriptor_path
            .as_ref()
            .filter(|p| p.exists())
            .map(|old| {
                let new = descriptor_path_for(&new_path);
                moves.push((old.clone(), new.clone()));
                new
            });

        // Nothing may be overwritten, companions included.
        if let Some((_, taken)) = moves.iter().find(|(_, to)| to.exists()) {
            return Err(SdcmError::Validation {
                field: "name".into(),
                message: format!("{} already exists", taken.display()),
            });
        }

        let mut done: Vec<&(PathBuf, PathBuf)> = Vec::with_capacity(moves.len());
        for step in &moves {
            if let Err(e) = std::fs::rename(&step.0, &step.1) {
                warn!("Rename {} failed: {}", step.0.display(), e);
                undo_renames(&done);
                return Err(SdcmError::io_with_path(e, &step.0));
            }
            done.push(step);
        }

        if let Err(e) = self.store.update_file_location(
            id,
            &new_path,
            new_thumbnail.as_deref(),
            new_descriptor.as_deref(),
        ) {
            undo_renames(&done);
            return Err(e);
        }

        info!("Renamed {} to {}", record.path.display(), new_path.display());
        self.record(id)
    }

    /// Delete a model file with its companions and retire its record.
    ///
    /// Companions recorded in the cache and companions found next to the
    /// file are both removed.
    pub fn delete_file(&self, path: &Path) -> Result<()> {
        let record = self.store.file_record_by_path(path)?;

        if let Some(record) = &record {
            for companion in [&record.thumbnail_path, &record.descriptor_path]
                .into_iter()
                .flatten()
            {
                remove_if_exists(companion)?;
            }
        }

        let companions = resolve_companions(path)?;
        for companion in [companions.thumbnail, companions.descriptor]
            .into_iter()
            .flatten()
        {
            remove_if_exists(&companion)?;
        }
        std::fs::remove_file(path).map_err(|e| SdcmError::io_with_path(e, path))?;

        if let Some(record) = record {
            self.store.soft_delete_file_record(&record.id)?;
        }
        info!("Deleted {}", path.display());
        Ok(())
    }

    /// Delete every local file of a version. Returns how many were removed.
    pub fn delete_version_files(&self, version_id: i64) -> Result<usize> {
        let records = self.store.version_file_records(version_id)?;
        if records.is_empty() {
            return Err(SdcmError::not_found("local files of version", version_id));
        }
        for record in &records {
            for path in [&record.thumbnail_path, &record.descriptor_path]
                .into_iter()
                .flatten()
                .chain(std::iter::once(&record.path))
            {
                remove_if_exists(path)?;
            }
            self.store.soft_delete_file_record(&record.id)?;
        }
        info!("Deleted {} local files of version {}", records.len(), version_id);
        Ok(records.len())
    }

    /// Set or clear (empty string) a file's memo.
    pub fn set_memo(&self, id: &str, memo: &str) -> Result<()> {
        self.store.set_file_memo(id, non_empty(memo))
    }

    /// Set or clear (empty string) a file's base-model override.
    pub fn set_base_model(&self, id: &str, base_model: &str) -> Result<()> {
        self.store.set_file_base_model(id, non_empty(base_model))
    }

    /// Add comma-separated prompts to a file. Returns the new list.
    pub fn add_prompts(&self, id: &str, prompts: &str) -> Result<Vec<String>> {
        let record = self.record(id)?;
        let merged = merge_prompts(&record.prompts, prompts);
        self.store.set_file_prompts(id, &merged)?;
        Ok(merged)
    }

    /// Remove prompts from a file. Returns the remaining list.
    pub fn remove_prompts(&self, id: &str, prompts: &[String]) -> Result<Vec<String>> {
        let record = self.record(id)?;
        let remaining = merge_prompts(
            &record
                .prompts
                .into_iter()
                .filter(|p| !prompts.contains(p))
                .collect::<Vec<_>>(),
            "",
        );
        self.store.set_file_prompts(id, &remaining)?;
        Ok(remaining)
    }

    /// Copy `source` next to the model as its thumbnail and re-fingerprint.
    ///
    /// The source is fingerprinted first, so an unreadable image changes
    /// nothing.
    pub fn replace_thumbnail(&self, id: &str, source: &Path) -> Result<PathBuf> {
        let record = self.record(id)?;
        if !source.exists() {
            return Err(SdcmError::FileNotFound(source.to_path_buf()));
        }
        let fingerprint = fingerprint_image(source)?;

        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        let target = thumbnail_path_for(&record.path, &ext);

        if let Some(old) = record.thumbnail_path.as_ref().filter(|old| **old != target) {
            remove_if_exists(old)?;
        }
        if source != target {
            std::fs::copy(source, &target).map_err(|e| SdcmError::io_with_path(e, &target))?;
        }

        self.store
            .set_file_thumbnail(id, &target, Some(&fingerprint))?;
        debug!("Thumbnail of {} is now {}", id, target.display());
        Ok(target)
    }

    /// Use a locally cached gallery image as the cover of a version and as
    /// the thumbnail of the version's primary file.
    pub fn use_gallery_image_as_cover(&self, version_id: i64, image_id: &str) -> Result<PathBuf> {
        let image = self
            .store
            .image(image_id)?
            .ok_or_else(|| SdcmError::not_found("image", image_id))?;
        let local = image.local_path.ok_or_else(|| SdcmError::Validation {
            field: "image".into(),
            message: format!("image {} has not been downloaded", image_id),
        })?;

        let record = self.primary_local_file(version_id)?;
        let thumbnail = self.replace_thumbnail(&record.id, &local)?;
        self.store.set_version_cover(version_id, image_id)?;
        Ok(thumbnail)
    }

    /// Whether the primary file of a version exists on disk.
    pub fn version_downloaded(&self, version_id: i64) -> Result<bool> {
        match self.primary_local_file(version_id) {
            Ok(_) => Ok(true),
            Err(SdcmError::NotFound { kind: "local primary file", .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn primary_local_file(&self, version_id: i64) -> Result<FileRecord> {
        let version = self
            .store
            .model_version(version_id)?
            .ok_or_else(|| SdcmError::not_found("model version", version_id))?;
        let primary = version
            .primary_file_id
            .map(|id| self.store.model_file(id))
            .transpose()?
            .flatten();
        let hash = primary.and_then(|f| f.identity_hash);

        let candidates = match hash {
            Some(hash) => self.store.file_records_by_hash(&hash)?,
            None => Vec::new(),
        };
        candidates
            .into_iter()
            .find(|r| r.path.exists())
            .ok_or_else(|| SdcmError::not_found("local primary file", version_id))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SdcmError::io_with_path(e, path)),
    }
}

fn undo_renames(done: &[&(PathBuf, PathBuf)]) {
    for (from, to) in done.iter().rev() {
        if let Err(e) = std::fs::rename(to, from) {
            warn!("Failed to restore {}: {}", from.display(), e);
        }
    }
}
