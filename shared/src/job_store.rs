/// In-memory store of download jobs and their progress records.
///
/// Every job owns a `watch` channel: writers replace the whole record,
/// observers (HTTP polls, WebSocket pushes) read or await the latest value.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{EventReceiver, JobEvent};
use crate::models::{JobRecord, JobStatus};

struct JobEntry {
    url: String,
    job_dir: PathBuf,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    record: watch::Sender<JobRecord>,
}

/// A job removed by the eviction pass.
#[derive(Debug, Clone)]
pub struct EvictedJob {
    pub job_id: String,
    pub url: String,
    pub job_dir: PathBuf,
    pub status: JobStatus,
}

/// Store statistics snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub starting: usize,
    pub downloading: usize,
    pub finished: usize,
    pub failed: usize,
    pub total_tracked: usize,
}

/// Cloneable handle to the shared job map.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in `starting` state. Returns false if the id is taken.
    pub async fn create(&self, job_id: &str, url: &str, job_dir: PathBuf) -> bool {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            warn!("Job {} already tracked", job_id);
            return false;
        }

        let now = Utc::now();
        let (record, _) = watch::channel(JobRecord::starting());
        jobs.insert(
            job_id.to_string(),
            JobEntry {
                url: url.to_string(),
                job_dir,
                created_at: now,
                updated_at: now,
                record,
            },
        );

        info!("Job {} created for {}", job_id, url);
        true
    }

    /// Current record of a job.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|entry| entry.record.borrow().clone())
    }

    /// Output directory reserved for a job.
    pub async fn job_dir(&self, job_id: &str) -> Option<PathBuf> {
        self.jobs.lock().await.get(job_id).map(|e| e.job_dir.clone())
    }

    /// Watch a job's record. The receiver errors once the job is evicted.
    pub async fn subscribe(&self, job_id: &str) -> Option<watch::Receiver<JobRecord>> {
        self.jobs.lock().await.get(job_id).map(|e| e.record.subscribe())
    }

    /// Replace a job's record.
    ///
    /// Returns false when the job is unknown or already terminal; terminal
    /// records are never overwritten.
    pub async fn set(&self, job_id: &str, record: JobRecord) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            warn!("Update for unknown job {}", job_id);
            return false;
        };

        if entry.record.borrow().is_terminal() {
            debug!("Ignoring update for terminal job {}", job_id);
            return false;
        }

        if record.is_terminal() {
            info!("Job {} -> {}", job_id, record.status());
        }
        entry.updated_at = Utc::now();
        entry.record.send_replace(record);
        true
    }

    /// Apply a runner event to a job.
    pub async fn apply(&self, job_id: &str, event: JobEvent) -> bool {
        self.set(job_id, event.into_record()).await
    }

    /// Drain a runner's event channel into the store until it closes.
    pub fn track(&self, job_id: String, mut events: EventReceiver) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let terminal = event.is_terminal();
                store.apply(&job_id, event).await;
                if terminal {
                    break;
                }
            }
            debug!("Event stream for job {} closed", job_id);
        })
    }

    pub async fn stats(&self) -> StoreStats {
        let jobs = self.jobs.lock().await;
        let mut stats = StoreStats {
            total_tracked: jobs.len(),
            ..StoreStats::default()
        };
        for entry in jobs.values() {
            match entry.record.borrow().status() {
                JobStatus::Starting => stats.starting += 1,
                JobStatus::Downloading => stats.downloading += 1,
                JobStatus::Finished => stats.finished += 1,
                JobStatus::Error => stats.failed += 1,
            }
        }
        stats
    }

    /// Remove terminal jobs whose last update is older than the retention period.
    ///
    /// A retention too large to subtract from the current time evicts nothing.
    pub async fn evict_expired(&self, retention_secs: u64) -> Vec<EvictedJob> {
        let cutoff = i64::try_from(retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|retention| Utc::now().checked_sub_signed(retention));

        match cutoff {
            Some(cutoff) => self.evict_terminal_before(cutoff).await,
            None => {
                debug!("Retention of {}s is out of range, nothing evicted", retention_secs);
                Vec::new()
            }
        }
    }

    /// Remove terminal jobs last updated before `cutoff`. Running jobs are kept.
    pub async fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<EvictedJob> {
        let mut jobs = self.jobs.lock().await;
        let mut evicted = Vec::new();

        jobs.retain(|job_id, entry| {
            let status = entry.record.borrow().status();
            if status.is_terminal() && entry.updated_at < cutoff {
                debug!(
                    "Evicting job {} (created {}, {})",
                    job_id, entry.created_at, status
                );
                evicted.push(EvictedJob {
                    job_id: job_id.clone(),
                    url: entry.url.clone(),
                    job_dir: entry.job_dir.clone(),
                    status,
                });
                false
            } else {
                true
            }
        });

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn progress(percent: &str) -> JobEvent {
        JobEvent::Progress {
            percent: percent.into(),
            speed: "1.00MiB/s".into(),
            eta: "00:05".into(),
            filename: "clip.webm".into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = JobStore::new();
        assert!(store.create("j1", "https://youtu.be/x", PathBuf::from("/tmp/j1")).await);
        assert_eq!(store.get("j1").await, Some(JobRecord::starting()));
        assert_eq!(store.job_dir("j1").await, Some(PathBuf::from("/tmp/j1")));
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let store = JobStore::new();
        assert!(store.create("j1", "u", PathBuf::from("/tmp/j1")).await);
        assert!(!store.create("j1", "u", PathBuf::from("/tmp/j1")).await);
        assert_eq!(store.stats().await.total_tracked, 1);
    }

    #[tokio::test]
    async fn test_terminal_record_is_final() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        assert!(store.apply("j1", progress("10.0%")).await);
        assert!(store.apply("j1", JobEvent::Failed { message: "boom".into() }).await);

        assert!(!store.apply("j1", progress("50.0%")).await);
        assert_eq!(store.get("j1").await, Some(JobRecord::error("boom")));
    }

    #[tokio::test]
    async fn test_unknown_job_update_rejected() {
        let store = JobStore::new();
        assert!(!store.set("nope", JobRecord::starting()).await);
    }

    #[tokio::test]
    async fn test_subscribe_sees_updates() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let mut rx = store.subscribe("j1").await.unwrap();

        store.apply("j1", progress("25.0%")).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status(), JobStatus::Downloading);
    }

    #[tokio::test]
    async fn test_track_drains_channel() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let (tx, rx) = events::channel();
        let handle = store.track("j1".into(), rx);

        tx.send(progress("99.0%")).unwrap();
        tx.send(JobEvent::Finished { filepath: "/tmp/j1/clip.mp4".into() }).unwrap();
        drop(tx);
        handle.await.unwrap();

        let record = store.get("j1").await.unwrap();
        assert_eq!(record.filepath(), Some("/tmp/j1/clip.mp4"));
    }

    #[tokio::test]
    async fn test_track_stops_after_terminal_event() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let (tx, rx) = events::channel();
        let handle = store.track("j1".into(), rx);

        tx.send(JobEvent::Failed { message: "boom".into() }).unwrap();
        handle.await.unwrap();
        assert!(tx.send(progress("50.0%")).is_err());
        assert_eq!(store.get("j1").await, Some(JobRecord::error("boom")));
    }

    #[tokio::test]
    async fn test_eviction_keeps_running_jobs() {
        let store = JobStore::new();
        store.create("running", "u", PathBuf::from("/tmp/r")).await;
        store.create("done", "u", PathBuf::from("/tmp/d")).await;
        store.apply("done", JobEvent::Finished { filepath: "/tmp/d/a.mp4".into() }).await;

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let evicted = store.evict_terminal_before(cutoff).await;

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].job_id, "done");
        assert_eq!(evicted[0].job_dir, PathBuf::from("/tmp/d"));
        assert!(store.get("running").await.is_some());
        assert!(store.get("done").await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_respects_retention() {
        let store = JobStore::new();
        store.create("done", "u", PathBuf::from("/tmp/d")).await;
        store.apply("done", JobEvent::Failed { message: "x".into() }).await;

        assert!(store.evict_expired(3600).await.is_empty());
        assert_eq!(store.stats().await.total_tracked, 1);
    }

    #[tokio::test]
    async fn test_huge_retention_never_evicts() {
        let store = JobStore::new();
        store.create("done", "u", PathBuf::from("/tmp/d")).await;
        store.apply("done", JobEvent::Failed { message: "x".into() }).await;

        assert!(store.evict_expired(u64::MAX).await.is_empty());
        assert!(store.evict_expired(100_000_000_000_000_000).await.is_empty());
        assert!(store.evict_expired(i64::MAX as u64).await.is_empty());
        assert!(store.get("done").await.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let evicted = store.evict_expired(0).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].url, "u");
    }

    #[tokio::test]
    async fn test_eviction_closes_watchers() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let mut rx = store.subscribe("j1").await.unwrap();
        store.apply("j1", JobEvent::Failed { message: "x".into() }).await;
        let _ = rx.borrow_and_update();

        store.evict_terminal_before(Utc::now() + chrono::Duration::seconds(1)).await;
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = JobStore::new();
        store.create("a", "u", PathBuf::from("/tmp/a")).await;
        store.create("b", "u", PathBuf::from("/tmp/b")).await;
        store.create("c", "u", PathBuf::from("/tmp/c")).await;
        store.apply("b", progress("1.0%")).await;
        store.apply("c", JobEvent::Failed { message: "x".into() }).await;

        let stats = store.stats().await;
        assert_eq!(stats.starting, 1);
        assert_eq!(stats.downloading, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_tracked, 3);
    }
}
