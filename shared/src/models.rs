/// Models shared across all Vidfetch crates.
use serde::{Deserialize, Serialize};

/// Status discriminant of a job record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Finished,
    Error,
}

impl JobStatus {
    /// Whether no further transition can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Placeholder used for speed/eta before the extractor reports them.
pub const NOT_AVAILABLE: &str = "N/A";

/// Progress record for a single download job.
///
/// Serialized with a `status` tag, e.g.
/// `{"status":"downloading","percent":"42.0%","speed":"1.2MiB/s","eta":"00:13","filename":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobRecord {
    Starting {
        percent: String,
        speed: String,
        eta: String,
    },
    Downloading {
        percent: String,
        speed: String,
        eta: String,
        filename: String,
    },
    Finished {
        filename: String,
        filepath: String,
    },
    Error {
        error: String,
    },
}

impl JobRecord {
    /// Initial record of a freshly accepted job.
    pub fn starting() -> Self {
        JobRecord::Starting {
            percent: "0%".to_string(),
            speed: NOT_AVAILABLE.to_string(),
            eta: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobRecord::Error { error: message.into() }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobRecord::Starting { .. } => JobStatus::Starting,
            JobRecord::Downloading { .. } => JobStatus::Downloading,
            JobRecord::Finished { .. } => JobStatus::Finished,
            JobRecord::Error { .. } => JobStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Final file path, if the job finished.
    pub fn filepath(&self) -> Option<&str> {
        match self {
            JobRecord::Finished { filepath, .. } => Some(filepath),
            _ => None,
        }
    }
}

/// One stream/format candidate reported by the extractor.
///
/// A passthrough projection of yt-dlp's format dictionary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatDescriptor {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub quality: Option<f64>,
    pub format_note: Option<String>,
    pub filesize: Option<u64>,
    pub tbr: Option<f64>,
    pub vbr: Option<f64>,
    pub abr: Option<f64>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub audio_only: bool,
    pub video_only: bool,
}

/// Metadata returned by the video-info lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: u64,
    pub uploader: String,
    pub view_count: u64,
    pub formats: Vec<FormatDescriptor>,
}

/// Body of a download request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
    #[serde(default)]
    pub quality: Option<String>,
}
