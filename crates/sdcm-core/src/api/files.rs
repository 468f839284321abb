//! File maintenance, run on the blocking pool.

use crate::error::Result;
use crate::file_ops::FileOps;
use crate::store::{FileRecord, FileSummary};
use crate::SdcmApi;
use std::path::{Path, PathBuf};

impl SdcmApi {
    async fn with_files<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileOps) -> Result<T> + Send + 'static,
    {
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || op(&files)).await?
    }

    pub fn file_record(&self, id: &str) -> Result<Option<FileRecord>> {
        self.store.file_record(id)
    }

    /// Summaries of cached files at `paths`.
    pub fn file_summaries(&self, paths: &[PathBuf]) -> Result<Vec<FileSummary>> {
        self.store.file_summaries(paths)
    }

    pub async fn rename_file(&self, id: &str, new_stem: &str) -> Result<FileRecord> {
        let (id, new_stem) = (id.to_string(), new_stem.to_string());
        self.with_files(move |ops| ops.rename_file(&id, &new_stem))
            .await
    }

    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.with_files(move |ops| ops.delete_file(&path)).await
    }

    pub async fn delete_version_files(&self, version_id: i64) -> Result<usize> {
        self.with_files(move |ops| ops.delete_version_files(version_id))
            .await
    }

    pub fn set_memo(&self, id: &str, memo: &str) -> Result<()> {
        self.files.set_memo(id, memo)
    }

    pub fn set_base_model(&self, id: &str, base_model: &str) -> Result<()> {
        self.files.set_base_model(id, base_model)
    }

    pub fn add_prompts(&self, id: &str, prompts: &str) -> Result<Vec<String>> {
        self.files.add_prompts(id, prompts)
    }

    pub fn remove_prompts(&self, id: &str, prompts: &[String]) -> Result<Vec<String>> {
        self.files.remove_prompts(id, prompts)
    }

    pub async fn replace_thumbnail(&self, id: &str, source: &Path) -> Result<PathBuf> {
        let (id, source) = (id.to_string(), source.to_path_buf());
        self.with_files(move |ops| ops.replace_thumbnail(&id, &source))
            .await
    }

    /// Make a gallery image the version cover, downloading it first when no
    /// local copy exists.
    pub async fn use_gallery_image_as_cover(&self, version_id: i64, image_id: &str) -> Result<PathBuf> {
        self.download_gallery_image(image_id).await?;
        let image_id = image_id.to_string();
        self.with_files(move |ops| ops.use_gallery_image_as_cover(version_id, &image_id))
            .await
    }

    pub async fn version_downloaded(&self, version_id: i64) -> Result<bool> {
        self.with_files(move |ops| ops.version_downloaded(version_id))
            .await
    }
}
