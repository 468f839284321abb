//! Directory and library scans.
//!
//! [`ScanOrchestrator::scan_directory`] lists one category directory, caches
//! every model file the store does not know yet and returns summaries for
//! everything it listed. [`ScanOrchestrator::full_scan`] walks every
//! configured root recursively and caches content it has never seen.
//!
//! Both dispatch per-file workers onto a bounded [`WorkerPool`]. Worker
//! failures become events; only an unlistable root or cancellation ends a
//! scan with an error.

pub mod pool;
mod worker;

pub use pool::{PoolStats, WorkerPool};

use crate::cancel::CancellationToken;
use crate::config::{LibraryConfig, ScanConfig};
use crate::error::{Result, SdcmError};
use crate::events::{BatchReporter, EventBus};
use crate::layout::{all_roots, resolver_for, ModelKind, UiTool};
use crate::registry::RegistryIngestor;
use crate::store::{CacheStore, FileSummary};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use worker::{ScanTally, WorkerContext, WorkerMode};

/// Totals of a full library scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullScanReport {
    pub batch: String,
    /// Model files found under all roots.
    pub discovered: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub peak_in_flight: usize,
}

/// True if `path` has one of the model file extensions.
pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let dotted = format!(".{}", ext.to_lowercase());
            ScanConfig::MODEL_EXTENSIONS.contains(&dotted.as_str())
        })
        .unwrap_or(false)
}

/// Runs directory and library scans against one cache store.
#[derive(Debug, Clone)]
pub struct ScanOrchestrator {
    config: Arc<LibraryConfig>,
    store: CacheStore,
    ingestor: RegistryIngestor,
    events: EventBus,
}

impl ScanOrchestrator {
    pub fn new(config: Arc<LibraryConfig>, store: CacheStore, events: EventBus) -> Self {
        let ingestor = RegistryIngestor::new(store.clone());
        Self {
            config,
            store,
            ingestor,
            events,
        }
    }

    /// Scan the model files directly inside `<root>/<subdir>` for every root
    /// of `kind`, then return summaries of all of them.
    ///
    /// `keyword`, when non-empty, keeps only summaries whose display name or
    /// file name contains it (case-sensitive).
    pub async fn scan_directory(
        &self,
        tool: UiTool,
        kind: ModelKind,
        subdir: &str,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileSummary>> {
        let subdir = checked_subdir(subdir)?;
        let targets: Vec<PathBuf> = resolver_for(tool, &self.config)?
            .directories(kind)
            .into_iter()
            .map(|root| root.join(&subdir))
            .collect();

        let files = tokio::task::spawn_blocking(move || list_model_files(&targets)).await??;
        debug!("Listed {} model files for {} {}", files.len(), tool, kind);

        let uncached = self.store.uncached_paths(&files)?;
        if !uncached.is_empty() {
            let reporter = self.events.batch();
            info!(
                "Scanning {} uncached files for {} {} (batch {})",
                uncached.len(),
                tool,
                kind,
                reporter.id()
            );
            reporter.begin(uncached.len());
            self.dispatch(uncached, &reporter, WorkerMode::Directory, cancel)
                .await?;
            reporter.finish();
        }

        let summaries = self.store.file_summaries(&files)?;
        Ok(filter_by_keyword(summaries, keyword))
    }

    /// Walk every configured root recursively and cache all model files
    /// whose content is not cached yet.
    ///
    /// Configured roots that do not exist are skipped; a root that exists
    /// but cannot be listed fails the scan.
    pub async fn full_scan(&self, cancel: &CancellationToken) -> Result<FullScanReport> {
        let roots = all_roots(&self.config);
        info!("Full scan over {} roots", roots.len());
        let files = tokio::task::spawn_blocking(move || walk_model_files(&roots)).await??;

        let reporter = self.events.batch();
        reporter.begin(files.len());
        let discovered = files.len();
        let (tally, stats) = self
            .dispatch(files, &reporter, WorkerMode::Library, cancel)
            .await?;
        reporter.finish();

        let report = FullScanReport {
            batch: reporter.id().to_string(),
            discovered,
            written: tally.written(),
            skipped: tally.skipped(),
            failed: tally.failed(),
            peak_in_flight: stats.peak_in_flight,
        };
        info!(
            "Full scan finished: {} found, {} cached, {} skipped, {} failed",
            report.discovered, report.written, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Names of the immediate subdirectories of every root of `kind`.
    ///
    /// Fails if a configured root does not exist or cannot be listed.
    pub fn list_sub_categories(&self, tool: UiTool, kind: ModelKind) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for root in resolver_for(tool, &self.config)?.directories(kind) {
            if !root.exists() {
                return Err(SdcmError::FileNotFound(root));
            }
            let entries = std::fs::read_dir(&root).map_err(|e| SdcmError::io_with_path(e, &root))?;
            let mut found = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| SdcmError::io_with_path(e, &root))?;
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    found.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            found.sort();
            names.extend(found);
        }
        Ok(names)
    }

    async fn dispatch(
        &self,
        files: Vec<PathBuf>,
        reporter: &BatchReporter,
        mode: WorkerMode,
        cancel: &CancellationToken,
    ) -> Result<(Arc<ScanTally>, PoolStats)> {
        let tally = Arc::new(ScanTally::default());
        let mut pool = WorkerPool::new(self.config.scan.concurrency);

        for path in files {
            let ctx = WorkerContext {
                store: self.store.clone(),
                ingestor: self.ingestor.clone(),
                reporter: reporter.clone(),
                tally: tally.clone(),
                mode,
            };
            if let Err(e) = pool.spawn(cancel, ctx.run(path)).await {
                warn!("Scan batch {} cancelled, draining workers", reporter.id());
                pool.join().await;
                reporter.cancelled();
                return Err(e);
            }
        }

        let stats = pool.join().await;
        debug!(
            "Batch {} drained: {} workers, peak {}",
            reporter.id(),
            stats.dispatched,
            stats.peak_in_flight
        );
        Ok((tally, stats))
    }
}

/// Reject sub-category paths that would leave the root.
fn checked_subdir(subdir: &str) -> Result<PathBuf> {
    let path = PathBuf::from(subdir);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SdcmError::Validation {
            field: "subdir".into(),
            message: format!("{} is not a relative sub-category", subdir),
        });
    }
    Ok(path)
}

/// Model files directly inside each directory, sorted and deduplicated.
fn list_model_files(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for dir in dirs {
        let entries = std::fs::read_dir(dir).map_err(|e| SdcmError::io_with_path(e, dir))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SdcmError::io_with_path(e, dir))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let path = entry.path();
            if is_model_file(&path) {
                found.push(path);
            }
        }
        found.sort();
        files.extend(found.into_iter().filter(|p| seen.insert(p.clone())));
    }
    Ok(files)
}

/// Model files anywhere below each root.
pub(crate) fn walk_model_files(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            debug!("Skipping missing root {}", root.display());
            continue;
        }
        std::fs::read_dir(root).map_err(|e| SdcmError::io_with_path(e, root))?;

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_file() && is_model_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn filter_by_keyword(summaries: Vec<FileSummary>, keyword: &str) -> Vec<FileSummary> {
    if keyword.is_empty() {
        return summaries;
    }
    summaries
        .into_iter()
        .filter(|s| {
            let file_name = s
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            s.name.contains(keyword) || file_name.contains(keyword)
        })
        .collect()
}
