/// yt-dlp subprocess backend.
///
/// Metadata comes from `yt-dlp -J`; downloads run with a tagged progress
/// template whose lines are turned into job events. Stderr is forwarded to
/// tracing under the `ytdlp` target.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use vidfetch_shared::errors::ExtractorError;
use vidfetch_shared::events::EventSender;
use vidfetch_shared::models::{FormatDescriptor, VideoInfo};

use crate::extractor::Extractor;
use crate::format_selector::DownloadPlan;
use crate::progress::{self, OutputLine};

/// Output template inside a job directory.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// How to invoke yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// yt-dlp executable (name on PATH or absolute path).
    pub bin: String,
    /// Passed as `--ffmpeg-location` when set.
    pub ffmpeg_location: Option<String>,
    /// Upper bound for a metadata query.
    pub probe_timeout_secs: u64,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            bin: "yt-dlp".to_string(),
            ffmpeg_location: None,
            probe_timeout_secs: 60,
        }
    }
}

pub struct YtDlp {
    config: YtDlpConfig,
}

impl YtDlp {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn spawn_error(&self, err: std::io::Error) -> ExtractorError {
        if err.kind() == ErrorKind::NotFound {
            ExtractorError::NotInstalled { program: self.config.bin.clone() }
        } else {
            ExtractorError::SpawnFailed {
                program: self.config.bin.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self, url: &str) -> Result<VideoInfo, ExtractorError> {
        debug!("Probing {}", url);
        let child = Command::new(&self.config.bin)
            .args(probe_args(url))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.config.probe_timeout_secs), child)
            .await
            .map_err(|_| ExtractorError::Timeout(self.config.probe_timeout_secs))?
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ExtractorError::Failed(run_error_message(
                &String::from_utf8_lossy(&output.stderr),
                output.status.code(),
            )));
        }

        parse_video_info(&output.stdout)
    }

    async fn download(
        &self,
        url: &str,
        plan: &DownloadPlan,
        job_dir: &Path,
        events: &EventSender,
    ) -> Result<Option<PathBuf>, ExtractorError> {
        let args = download_args(url, plan, job_dir, self.config.ffmpeg_location.as_deref());
        info!("Starting yt-dlp: format={:?} audio={} dir={:?}", plan.selector, plan.is_audio(), job_dir);
        debug!("yt-dlp args: {:?}", args);

        let mut child = Command::new(&self.config.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Failed("No stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Failed("No stderr handle".into()))?;

        let read_stdout = async {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            let mut final_path = None;
            let mut destination = String::new();
            while let Some(line) = read_lossy_line(&mut reader, &mut buf).await {
                if let Some(dest) = progress::parse_destination(&line) {
                    destination = dest;
                }
                match progress::parse_line(&line) {
                    Some(OutputLine::FinalPath(path)) => final_path = Some(PathBuf::from(path)),
                    Some(mut progress_line) => {
                        if let OutputLine::Progress { filename, .. } = &mut progress_line {
                            if filename.is_empty() {
                                filename.clone_from(&destination);
                            }
                        }
                        if let Some(event) = progress_line.into_event() {
                            let _ = events.send(event);
                        }
                    }
                    None => debug!(target: "ytdlp", "{}", line),
                }
            }
            final_path
        };

        let read_stderr = async {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            let mut tail = Vec::new();
            while let Some(line) = read_lossy_line(&mut reader, &mut buf).await {
                debug!(target: "ytdlp", "{}", line);
                if let Some(event) = progress::parse_line(&line).and_then(OutputLine::into_event) {
                    let _ = events.send(event);
                    continue;
                }
                tail.push(line);
                if tail.len() > 50 {
                    tail.remove(0);
                }
            }
            tail.join("\n")
        };

        let (final_path, stderr_tail) = tokio::join!(read_stdout, read_stderr);
        let status = child.wait().await?;

        if !status.success() {
            let message = run_error_message(&stderr_tail, status.code());
            warn!("yt-dlp failed ({}): {}", status, message);
            return Err(ExtractorError::Failed(message));
        }

        info!("yt-dlp finished: {:?}", final_path);
        Ok(final_path)
    }
}

/// Next line of tool output, decoded lossily. `None` at end of stream.
///
/// Invalid UTF-8 (common in titles and paths from some platforms) does not
/// end the stream.
pub async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(
            String::from_utf8_lossy(&buf[..])
                .trim_end_matches(|c| c == '\n' || c == '\r')
                .to_string(),
        ),
        Err(e) => {
            warn!("Reading yt-dlp output failed: {}", e);
            None
        }
    }
}

/// Arguments for a metadata query.
pub fn probe_args(url: &str) -> Vec<String> {
    vec![
        "-J".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--".to_string(),
        url.to_string(),
    ]
}

/// Arguments for a download into `job_dir`.
pub fn download_args(
    url: &str,
    plan: &DownloadPlan,
    job_dir: &Path,
    ffmpeg_location: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--no-warnings".to_string(),
        "--no-playlist".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        progress::progress_template(),
        "--print".to_string(),
        progress::final_path_template(),
        "-o".to_string(),
        job_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
        "-f".to_string(),
        plan.selector.clone(),
    ];

    if let Some(audio) = &plan.audio {
        args.extend([
            "-x".to_string(),
            "--audio-format".to_string(),
            audio.codec.clone(),
            "--audio-quality".to_string(),
            format!("{}K", audio.quality_kbps),
        ]);
    }

    if let Some(location) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(location.to_string());
    }

    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// Pick the most useful line of yt-dlp stderr as an error message.
pub fn run_error_message(stderr: &str, code: Option<i32>) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
        .unwrap_or_else(|| match code {
            Some(c) => format!("yt-dlp exited with code {}", c),
            None => "yt-dlp was terminated by a signal".to_string(),
        })
}

// ====== METADATA PROJECTION ======

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    title: String,
    thumbnail: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    view_count: Option<f64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    quality: Option<f64>,
    format_note: Option<String>,
    filesize: Option<f64>,
    tbr: Option<f64>,
    vbr: Option<f64>,
    abr: Option<f64>,
    acodec: Option<String>,
    vcodec: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
    fps: Option<f64>,
}

impl RawFormat {
    fn has_stream(&self) -> bool {
        self.vcodec.as_deref() != Some("none") || self.acodec.as_deref() != Some("none")
    }

    fn into_descriptor(self) -> FormatDescriptor {
        let audio_only = self.vcodec.as_deref() == Some("none");
        let video_only = self.acodec.as_deref() == Some("none");
        FormatDescriptor {
            format_id: self.format_id,
            ext: self.ext,
            quality: self.quality,
            format_note: self.format_note,
            filesize: self.filesize.map(|v| v as u64),
            tbr: self.tbr,
            vbr: self.vbr,
            abr: self.abr,
            acodec: self.acodec,
            vcodec: self.vcodec,
            width: self.width.map(|v| v as u32),
            height: self.height.map(|v| v as u32),
            fps: self.fps,
            audio_only,
            video_only,
        }
    }
}

/// Turn `yt-dlp -J` output into the public video-info shape.
pub fn parse_video_info(json: &[u8]) -> Result<VideoInfo, ExtractorError> {
    let raw: RawInfo =
        serde_json::from_slice(json).map_err(|e| ExtractorError::InvalidJson(e.to_string()))?;

    let formats = raw
        .formats
        .into_iter()
        .filter(RawFormat::has_stream)
        .map(RawFormat::into_descriptor)
        .collect();

    Ok(VideoInfo {
        id: raw.id,
        title: raw.title,
        thumbnail: raw.thumbnail.unwrap_or_default(),
        duration: raw.duration.map(|d| d.round() as u64).unwrap_or(0),
        uploader: raw.uploader.unwrap_or_else(|| "Unknown".to_string()),
        view_count: raw.view_count.map(|v| v as u64).unwrap_or(0),
        formats,
    })
}
