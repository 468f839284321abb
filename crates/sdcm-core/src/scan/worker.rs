//! Per-file scan worker.
//!
//! A worker never returns an error to its dispatcher: every failure is
//! reported as an `error` event attributed to the file and the worker ends.

use crate::companion::resolve_companions_async;
use crate::events::BatchReporter;
use crate::identity::{compute_identity_async, fingerprint_image_async};
use crate::registry::{IngestedVersion, RegistryIngestor};
use crate::store::{CacheStore, FileRecord};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a worker treats files whose content is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerMode {
    /// Directory scan: companions and descriptor first, then the
    /// insert-if-hash-absent write decides.
    Directory,
    /// Full library scan: hash first and skip cached content before touching
    /// companions.
    Library,
}

/// Final state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileOutcome {
    Written,
    Skipped,
    Failed,
}

/// Per-batch counters updated by workers.
#[derive(Debug, Default)]
pub(crate) struct ScanTally {
    written: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl ScanTally {
    fn record(&self, outcome: FileOutcome) {
        let counter = match outcome {
            FileOutcome::Written => &self.written,
            FileOutcome::Skipped => &self.skipped,
            FileOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub(crate) fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Everything a worker needs, cloned into each task.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub store: CacheStore,
    pub ingestor: RegistryIngestor,
    pub reporter: BatchReporter,
    pub tally: Arc<ScanTally>,
    pub mode: WorkerMode,
}

impl WorkerContext {
    /// Process one model file and report how it ended.
    pub(crate) async fn run(self, path: PathBuf) {
        if self.mode == WorkerMode::Library {
            self.reporter.start(&path);
        }

        let outcome = self.process(&path).await;
        self.tally.record(outcome);

        match self.mode {
            WorkerMode::Directory => self.reporter.progress(&path),
            WorkerMode::Library => {
                if outcome == FileOutcome::Written {
                    self.reporter.done(&path);
                }
            }
        }
    }

    async fn process(&self, path: &Path) -> FileOutcome {
        debug!("Scanning {}", path.display());

        let mut identity = None;
        if self.mode == WorkerMode::Library {
            let id = match compute_identity_async(path).await {
                Ok(id) => id,
                Err(e) => return self.fail(path, "Failed to hash model file", e),
            };
            match self.store.hash_exists(&id.sha256) {
                Ok(true) => {
                    debug!("{} already cached, skipping", path.display());
                    self.reporter.skip(path);
                    return FileOutcome::Skipped;
                }
                Ok(false) => {}
                Err(e) => return self.fail(path, "Failed to look up cached hash", e),
            }
            identity = Some(id);
        }

        let companions = match resolve_companions_async(path).await {
            Ok(companions) => companions,
            Err(e) => return self.fail(path, "Failed to collect companion files", e),
        };

        // A broken descriptor must not keep the file out of the cache.
        let ingested = match &companions.descriptor {
            Some(descriptor) => self.ingest_descriptor(path, descriptor).await,
            None => None,
        };

        let identity = match identity {
            Some(id) => id,
            None => match compute_identity_async(path).await {
                Ok(id) => id,
                Err(e) => return self.fail(path, "Failed to hash model file", e),
            },
        };

        let fingerprint = match &companions.thumbnail {
            Some(thumbnail) => match fingerprint_image_async(thumbnail).await {
                Ok(fp) => Some(fp),
                Err(e) => return self.fail(path, "Failed to fingerprint thumbnail", e),
            },
            None => None,
        };

        let mut record = FileRecord::new(path, &identity);
        record.thumbnail_path = companions.thumbnail;
        record.thumbnail_fingerprint = fingerprint;
        record.descriptor_path = companions.descriptor;
        record.related_version_id = ingested.as_ref().map(|v| v.version.id);

        match self.store.insert_file_record_if_hash_absent(&record) {
            Ok(true) => {
                debug!("Cached {} as {}", path.display(), record.id);
                FileOutcome::Written
            }
            Ok(false) => {
                debug!("Content of {} already cached", path.display());
                self.reporter.skip(path);
                FileOutcome::Skipped
            }
            Err(e) => self.fail(path, "Failed to write file record", e),
        }
    }

    async fn ingest_descriptor(&self, path: &Path, descriptor: &Path) -> Option<IngestedVersion> {
        let bytes = match tokio::fs::read(descriptor).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read descriptor {}: {}", descriptor.display(), e);
                self.reporter
                    .error(path, format!("Failed to read descriptor: {}", e));
                return None;
            }
        };

        let ingestor = self.ingestor.clone();
        let result = tokio::task::spawn_blocking(move || ingestor.ingest_version(&bytes)).await;
        match result {
            Ok(Ok(version)) => Some(version),
            Ok(Err(e)) => {
                warn!("Failed to ingest descriptor {}: {}", descriptor.display(), e);
                self.reporter
                    .error(path, format!("Failed to parse descriptor: {}", e));
                None
            }
            Err(e) => {
                warn!("Descriptor ingest task failed: {}", e);
                self.reporter
                    .error(path, format!("Failed to parse descriptor: {}", e));
                None
            }
        }
    }

    fn fail(&self, path: &Path, what: &str, err: impl std::fmt::Display) -> FileOutcome {
        warn!("{} {}: {}", what, path.display(), err);
        self.reporter.error(path, format!("{}: {}", what, err));
        FileOutcome::Failed
    }
}
