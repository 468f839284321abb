//! Scans, duplicate detection and registry sync.

use crate::cancel::CancellationToken;
use crate::duplicates::DuplicateGroup;
use crate::error::Result;
use crate::layout::{ModelKind, UiTool};
use crate::scan::FullScanReport;
use crate::store::FileSummary;
use crate::sync::SyncReport;
use crate::SdcmApi;

impl SdcmApi {
    /// Scan one category directory and return summaries of its files.
    pub async fn scan_directory(
        &self,
        tool: UiTool,
        kind: ModelKind,
        subdir: &str,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileSummary>> {
        self.scanner
            .scan_directory(tool, kind, subdir, keyword, cancel)
            .await
    }

    /// Cache every model file under every configured root.
    pub async fn full_scan(&self, cancel: &CancellationToken) -> Result<FullScanReport> {
        self.scanner.full_scan(cancel).await
    }

    pub fn list_sub_categories(&self, tool: UiTool, kind: ModelKind) -> Result<Vec<String>> {
        self.scanner.list_sub_categories(tool, kind)
    }

    pub async fn find_duplicates(&self, cancel: &CancellationToken) -> Result<Vec<DuplicateGroup>> {
        self.duplicates.find_duplicates(cancel).await
    }

    /// Refresh every model whose registry data is stale.
    pub async fn sync_stale_models(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.sync.sync_stale_models(cancel).await
    }
}
