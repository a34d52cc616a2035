/// Job events published by a running download and applied to the job store.
///
/// The runner owns the sending half of an unbounded channel; the store is the
/// only consumer, so progress reporting never touches shared state directly.
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::mpsc;

use crate::models::JobRecord;

/// Event emitted while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Transfer progress as reported by the extractor.
    Progress {
        percent: String,
        speed: String,
        eta: String,
        filename: String,
    },
    /// A new attempt is starting with a relaxed format selector.
    Retrying { selector: String },
    /// Post-processing is done and the final file is at `filepath`.
    Finished { filepath: String },
    /// The job failed for good.
    Failed { message: String },
}

pub type EventSender = mpsc::UnboundedSender<JobEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Create the channel a runner uses to report on one job.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Finished { .. } | JobEvent::Failed { .. })
    }

    /// The record this event turns a job into.
    pub fn into_record(self) -> JobRecord {
        match self {
            JobEvent::Progress { percent, speed, eta, filename } => {
                JobRecord::Downloading { percent, speed, eta, filename }
            }
            JobEvent::Retrying { .. } => JobRecord::starting(),
            JobEvent::Finished { filepath } => {
                let filename = Path::new(&filepath)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filepath.clone());
                JobRecord::Finished { filename, filepath }
            }
            JobEvent::Failed { message } => JobRecord::Error { error: message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn test_progress_becomes_downloading() {
        let ev = JobEvent::Progress {
            percent: " 42.5%".into(),
            speed: "1.20MiB/s".into(),
            eta: "00:10".into(),
            filename: "a.webm".into(),
        };
        assert!(!ev.is_terminal());
        assert_eq!(ev.into_record().status(), JobStatus::Downloading);
    }

    #[test]
    fn test_finished_derives_filename() {
        let ev = JobEvent::Finished { filepath: "/data/job-1/My Clip.mp3".into() };
        assert!(ev.is_terminal());
        match ev.into_record() {
            JobRecord::Finished { filename, filepath } => {
                assert_eq!(filename, "My Clip.mp3");
                assert_eq!(filepath, "/data/job-1/My Clip.mp3");
            }
            other => panic!("Expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn test_retrying_resets_to_starting() {
        let ev = JobEvent::Retrying { selector: "best".into() };
        assert_eq!(ev.into_record(), JobRecord::starting());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&JobEvent::Failed { message: "boom".into() }).unwrap();
        assert!(json.contains(r#""event":"failed""#));
    }
}
