//! Library-wide duplicate detection by content hash.

use crate::cancel::CancellationToken;
use crate::companion::resolve_companions;
use crate::config::LibraryConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::identity::compute_identity_async;
use crate::layout::all_roots;
use crate::scan::{walk_model_files, WorkerPool};
use crate::store::{CacheStore, ResolvedModel};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One file sharing its content with at least one other file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMember {
    pub path: PathBuf,
    pub file_name: String,
    pub thumbnail_path: Option<PathBuf>,
    pub descriptor_path: Option<PathBuf>,
    /// Id of the cache record at exactly this path, if any.
    pub cache_id: Option<String>,
}

/// Files with identical content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub hash: String,
    /// Size of one copy in bytes.
    pub size: u64,
    pub model: Option<ResolvedModel>,
    /// Members in path order.
    pub files: Vec<DuplicateMember>,
}

impl DuplicateGroup {
    /// Bytes freed by keeping a single copy.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size * (self.files.len().saturating_sub(1) as u64)
    }
}

/// Finds identical model files across every configured root.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    config: Arc<LibraryConfig>,
    store: CacheStore,
    events: EventBus,
}

impl DuplicateDetector {
    pub fn new(config: Arc<LibraryConfig>, store: CacheStore, events: EventBus) -> Self {
        Self {
            config,
            store,
            events,
        }
    }

    /// Hash every model file under every root and return the groups with
    /// more than one member, sorted by hash.
    ///
    /// Progress goes out as one scan batch: `start` and then `done` or
    /// `error` per file. Files that cannot be hashed are reported and left
    /// out.
    pub async fn find_duplicates(&self, cancel: &CancellationToken) -> Result<Vec<DuplicateGroup>> {
        let roots = all_roots(&self.config);
        let files = tokio::task::spawn_blocking(move || walk_model_files(&roots)).await??;
        self.group_files(files, cancel).await
    }

    /// Hash the listed files and group them by content. Files gone since
    /// they were listed count as failures.
    async fn group_files(
        &self,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DuplicateGroup>> {
        info!("Hashing {} files for duplicate detection", files.len());

        let reporter = self.events.batch();
        reporter.begin(files.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(self.config.scan.concurrency);
        for path in files {
            let tx = tx.clone();
            let task_reporter = reporter.clone();
            let spawned = pool
                .spawn(cancel, async move {
                    task_reporter.start(&path);
                    match compute_identity_async(&path).await {
                        Ok(identity) => {
                            task_reporter.done(&path);
                            let _ = tx.send((identity.sha256, identity.size, path));
                        }
                        Err(e) => {
                            warn!("Skipping {}: {}", path.display(), e);
                            task_reporter.error(&path, format!("Failed to hash model file: {}", e));
                        }
                    }
                })
                .await;
            if let Err(e) = spawned {
                warn!("Duplicate scan {} cancelled, draining workers", reporter.id());
                pool.join().await;
                reporter.cancelled();
                return Err(e);
            }
        }
        drop(tx);
        pool.join().await;
        reporter.finish();

        let mut by_hash: HashMap<String, (u64, Vec<PathBuf>)> = HashMap::new();
        while let Some((hash, size, path)) = rx.recv().await {
            by_hash.entry(hash).or_insert((size, Vec::new())).1.push(path);
        }

        let mut groups = Vec::new();
        for (hash, (size, mut paths)) in by_hash {
            if paths.len() < 2 {
                continue;
            }
            paths.sort();
            let files = paths
                .into_iter()
                .map(|path| self.member(path))
                .collect::<Result<Vec<_>>>()?;
            let model = self.store.resolve_model_by_hash(&hash)?;
            debug!("{} copies of {}", files.len(), hash);
            groups.push(DuplicateGroup {
                hash,
                size,
                model,
                files,
            });
        }
        groups.sort_by(|a, b| a.hash.cmp(&b.hash));
        info!("Found {} duplicate groups", groups.len());
        Ok(groups)
    }

    fn member(&self, path: PathBuf) -> Result<DuplicateMember> {
        let companions = resolve_companions(&path).unwrap_or_default();
        let cache_id = self.store.file_record_by_path(&path)?.map(|r| r.id);
        Ok(DuplicateMember {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            thumbnail_path: companions.thumbnail,
            descriptor_path: companions.descriptor,
            cache_id,
            path,
        })
    }
}
