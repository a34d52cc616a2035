/// Format-selector construction for yt-dlp.
///
/// Maps the user-facing hints of a download request (explicit format id,
/// audio-only flag, quality hint) to a yt-dlp `-f` expression, and decides
/// whether the audio-extraction post-processor runs.
use vidfetch_shared::models::DownloadRequest;

/// Codec produced by the audio-extraction post-processor.
pub const AUDIO_CODEC: &str = "mp3";
/// Target bitrate (kbps) of the audio-extraction post-processor.
pub const AUDIO_QUALITY_KBPS: u32 = 192;

/// Audio-extraction post-processing step (yt-dlp `-x`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioExtraction {
    pub codec: String,
    pub quality_kbps: u32,
}

impl Default for AudioExtraction {
    fn default() -> Self {
        Self {
            codec: AUDIO_CODEC.to_string(),
            quality_kbps: AUDIO_QUALITY_KBPS,
        }
    }
}

/// Everything the extractor needs to know about what to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub selector: String,
    pub audio: Option<AudioExtraction>,
}

impl DownloadPlan {
    pub fn from_request(request: &DownloadRequest) -> Self {
        let selector = build_selector(
            request.format_id.as_deref(),
            request.audio_only,
            request.quality.as_deref(),
        );
        // An explicit format id is delivered as picked, without transcoding.
        let extract_audio = request.audio_only && non_empty(request.format_id.as_deref()).is_none();
        Self {
            selector,
            audio: extract_audio.then(AudioExtraction::default),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Same plan with the relaxed selector used after a format miss.
    pub fn fallback(&self) -> Self {
        Self {
            selector: fallback_selector(self.is_audio()).to_string(),
            audio: self.audio.clone(),
        }
    }
}

/// Build the yt-dlp format selector for a request.
pub fn build_selector(format_id: Option<&str>, audio_only: bool, quality: Option<&str>) -> String {
    if let Some(id) = non_empty(format_id) {
        return id.to_string();
    }

    let quality = non_empty(quality);
    if audio_only {
        match quality {
            None | Some("best") => "bestaudio/best".to_string(),
            Some("worst") => "worstaudio/worst".to_string(),
            Some(q) => format!("bestaudio[abr<={}]/bestaudio/best", normalize_hint(q)),
        }
    } else {
        match quality {
            None | Some("best") => "best".to_string(),
            Some("worst") => "worst".to_string(),
            Some(q) => format!("best[height<={}]/best", normalize_hint(q)),
        }
    }
}

/// Relaxed selector for the one-shot retry.
pub fn fallback_selector(audio_only: bool) -> &'static str {
    if audio_only {
        "bestaudio/best"
    } else {
        "best"
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Numeric hints are rendered canonically; anything else passes through.
fn normalize_hint(hint: &str) -> String {
    match hint.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => hint.to_string(),
    }
}
