// Extractor trait: the seam between job orchestration and the external tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use vidfetch_shared::errors::ExtractorError;
use vidfetch_shared::events::EventSender;
use vidfetch_shared::models::VideoInfo;

use crate::format_selector::DownloadPlan;

/// A media-extraction backend.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Query metadata and format candidates without downloading.
    async fn probe(&self, url: &str) -> Result<VideoInfo, ExtractorError>;

    /// Download `url` into `job_dir` according to `plan`.
    ///
    /// Progress is reported through `events`. Returns the final file path if
    /// the backend announced one; the caller verifies it.
    async fn download(
        &self,
        url: &str,
        plan: &DownloadPlan,
        job_dir: &Path,
        events: &EventSender,
    ) -> Result<Option<PathBuf>, ExtractorError>;
}
