/// Background download jobs.
///
/// A `JobRunner` registers a job in the store, spawns it, limits how many
/// run at once, and turns the extractor outcome into the job's terminal
/// record. A "format not available" failure gets exactly one retry with a
/// relaxed selector.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use vidfetch_shared::errors::{ExtractorError, VidfetchError, FORMAT_UNAVAILABLE_MARKER};
use vidfetch_shared::events::{self, EventSender, JobEvent};
use vidfetch_shared::job_store::JobStore;
use vidfetch_shared::models::DownloadRequest;

use crate::extractor::Extractor;
use crate::format_selector::DownloadPlan;
use crate::output;

/// Runner limits.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Parent of every job directory.
    pub download_dir: PathBuf,
    pub max_concurrent: usize,
    pub download_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            max_concurrent: 3,
            download_timeout_secs: 3600,
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    extractor: Arc<dyn Extractor>,
    store: JobStore,
    slots: Arc<Semaphore>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(extractor: Arc<dyn Extractor>, store: JobStore, config: RunnerConfig) -> Self {
        Self {
            extractor,
            store,
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    /// Accept a download request and start it in the background.
    ///
    /// Returns the new job identifier.
    pub async fn start(&self, request: &DownloadRequest) -> Result<String, VidfetchError> {
        let job_id = Uuid::new_v4().to_string();
        let plan = DownloadPlan::from_request(request);
        let job_dir = self.config.download_dir.join(&job_id);

        tokio::fs::create_dir_all(&job_dir).await?;
        if !self.store.create(&job_id, &request.url, job_dir.clone()).await {
            return Err(VidfetchError::DuplicateJob(job_id));
        }

        info!(
            "Job {} accepted: url={} format={:?} audio_only={} quality={:?}",
            job_id, request.url, plan.selector, request.audio_only, request.quality
        );

        let runner = self.clone();
        let url = request.url.clone();
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            runner.run(&spawned_id, &url, plan, &job_dir).await;
        });

        Ok(job_id)
    }

    /// Run a registered job to completion and record its terminal state.
    pub async fn run(&self, job_id: &str, url: &str, plan: DownloadPlan, job_dir: &Path) {
        let _permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Download slots closed, job {} cannot run", job_id);
                self.store
                    .apply(job_id, JobEvent::Failed { message: "Download slots closed".into() })
                    .await;
                return;
            }
        };

        let (tx, rx) = events::channel();
        let tracker = self.store.track(job_id.to_string(), rx);

        let timeout = Duration::from_secs(self.config.download_timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.download_with_fallback(url, &plan, job_dir, &tx)).await;

        let terminal = match outcome {
            Ok(Ok(path)) => {
                info!("Job {} finished: {:?}", job_id, path);
                JobEvent::Finished { filepath: path.to_string_lossy().into_owned() }
            }
            Ok(Err(message)) => {
                warn!("Job {} failed: {}", job_id, message);
                JobEvent::Failed { message }
            }
            Err(_) => {
                warn!("Job {} timed out", job_id);
                JobEvent::Failed {
                    message: format!("Download timed out after {}s", self.config.download_timeout_secs),
                }
            }
        };

        let _ = tx.send(terminal);
        drop(tx);
        if let Err(e) = tracker.await {
            error!("Event tracker for job {} panicked: {}", job_id, e);
        }
    }

    async fn download_with_fallback(
        &self,
        url: &str,
        plan: &DownloadPlan,
        job_dir: &Path,
        events: &EventSender,
    ) -> Result<PathBuf, String> {
        match self.attempt(url, plan, job_dir, events).await {
            Ok(path) => Ok(path),
            Err(e) if e.is_format_unavailable() => {
                let fallback = plan.fallback();
                warn!("Format {:?} not available, retrying with {:?}", plan.selector, fallback.selector);
                let _ = events.send(JobEvent::Retrying { selector: fallback.selector.clone() });

                self.attempt(url, &fallback, job_dir, events)
                    .await
                    .map_err(|e| format!("{}. Fallback failed: {}", FORMAT_UNAVAILABLE_MARKER, e))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        plan: &DownloadPlan,
        job_dir: &Path,
        events: &EventSender,
    ) -> Result<PathBuf, ExtractorError> {
        let reported = self.extractor.download(url, plan, job_dir, events).await?;
        output::resolve_output_file(job_dir, reported.as_deref())
            .await?
            .ok_or(ExtractorError::NoOutput)
    }
}
