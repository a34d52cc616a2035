/// Parsing of yt-dlp console output.
///
/// The download command asks yt-dlp for two tagged line kinds:
/// - `[vidfetch] <status>|<percent>|<speed>|<eta>|<filename>` via `--progress-template`
/// - `[vidfetch-file] <path>` via `--print after_move:...`
///
/// Stock `[download]  42.0% of 10.00MiB at 1.00MiB/s ETA 00:05` lines are
/// understood as well, for yt-dlp builds that ignore the template.
use once_cell::sync::Lazy;
use regex::Regex;

use vidfetch_shared::events::JobEvent;
use vidfetch_shared::models::NOT_AVAILABLE;

pub const PROGRESS_TAG: &str = "[vidfetch]";
pub const FILE_TAG: &str = "[vidfetch-file]";

/// Value for `--progress-template`.
pub fn progress_template() -> String {
    format!(
        "download:{} %(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s|%(progress.filename)s",
        PROGRESS_TAG
    )
}

/// Value for `--print`, emitted once the file reached its final location.
pub fn final_path_template() -> String {
    format!("after_move:{} %(filepath)s", FILE_TAG)
}

/// A line of yt-dlp output we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Progress {
        percent: String,
        speed: String,
        eta: String,
        filename: String,
    },
    FinalPath(String),
}

impl OutputLine {
    /// Convert to the runner event, if any.
    pub fn into_event(self) -> Option<JobEvent> {
        match self {
            OutputLine::Progress { percent, speed, eta, filename } => {
                Some(JobEvent::Progress { percent, speed, eta, filename })
            }
            OutputLine::FinalPath(_) => None,
        }
    }
}

static ANSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

static STOCK_PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[download\]\s+(\d+\.?\d*%)\s+of\s+~?\s*\S+\s+at\s+(\S+)(?:\s+ETA\s+(\S+))?",
    )
    .unwrap()
});

static DESTINATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap());

/// Parse one line of yt-dlp stdout/stderr.
pub fn parse_line(line: &str) -> Option<OutputLine> {
    let line = ANSI_RE.replace_all(line.trim(), "");
    let line = line.as_ref();

    if let Some(rest) = line.strip_prefix(FILE_TAG) {
        let path = rest.trim();
        return (!path.is_empty() && path != "NA").then(|| OutputLine::FinalPath(path.to_string()));
    }

    if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
        return parse_template_line(rest.trim());
    }

    if let Some(caps) = STOCK_PROGRESS_RE.captures(line) {
        return Some(OutputLine::Progress {
            percent: caps[1].to_string(),
            speed: caps[2].to_string(),
            eta: caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            filename: String::new(),
        });
    }

    None
}

/// Destination announced by a stock `[download] Destination:` line.
pub fn parse_destination(line: &str) -> Option<String> {
    DESTINATION_RE
        .captures(line.trim())
        .map(|caps| caps[1].trim().to_string())
}

fn parse_template_line(body: &str) -> Option<OutputLine> {
    let mut parts = body.splitn(5, '|');
    let status = parts.next()?.trim();
    let percent = field(parts.next());
    let speed = field(parts.next());
    let eta = field(parts.next());
    let filename = parts.next().map(|f| f.trim().to_string()).unwrap_or_default();

    match status {
        "downloading" => Some(OutputLine::Progress { percent, speed, eta, filename }),
        // The transfer is done; post-processing may still follow.
        "finished" => Some(OutputLine::Progress {
            percent: "100%".to_string(),
            speed,
            eta: NOT_AVAILABLE.to_string(),
            filename,
        }),
        _ => None,
    }
}

fn field(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() && v != "NA" && v != "Unknown" => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}
