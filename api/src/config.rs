/// Server configuration read from the environment.
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use vidfetch_downloader::{RunnerConfig, YtDlpConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_host: String,
    pub api_port: u16,
    pub download_dir: PathBuf,
    pub ytdlp_bin: String,
    pub ffmpeg_location: Option<String>,
    pub max_concurrent_downloads: usize,
    pub probe_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub job_retention_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            download_dir: PathBuf::from("./downloads"),
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_location: None,
            max_concurrent_downloads: 3,
            probe_timeout_secs: 60,
            download_timeout_secs: 3600,
            job_retention_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            api_host: text("API_HOST").unwrap_or(defaults.api_host),
            api_port: parsed(&lookup, "API_PORT", defaults.api_port),
            download_dir: text("DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.download_dir),
            ytdlp_bin: text("YTDLP_BIN").unwrap_or(defaults.ytdlp_bin),
            ffmpeg_location: text("FFMPEG_LOCATION"),
            max_concurrent_downloads: parsed(&lookup, "MAX_CONCURRENT_DOWNLOADS", defaults.max_concurrent_downloads)
                .max(1),
            probe_timeout_secs: parsed(&lookup, "PROBE_TIMEOUT_SECS", defaults.probe_timeout_secs),
            download_timeout_secs: parsed(&lookup, "DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout_secs),
            job_retention_secs: parsed(&lookup, "JOB_RETENTION_SECS", defaults.job_retention_secs),
            cleanup_interval_secs: parsed(&lookup, "CLEANUP_INTERVAL_SECS", defaults.cleanup_interval_secs)
                .max(1),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn ytdlp(&self) -> YtDlpConfig {
        YtDlpConfig {
            bin: self.ytdlp_bin.clone(),
            ffmpeg_location: self.ffmpeg_location.clone(),
            probe_timeout_secs: self.probe_timeout_secs,
        }
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            download_dir: self.download_dir.clone(),
            max_concurrent: self.max_concurrent_downloads,
            download_timeout_secs: self.download_timeout_secs,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.download_dir, PathBuf::from("./downloads"));
        assert_eq!(config.max_concurrent_downloads, 3);
        assert!(config.ffmpeg_location.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("API_PORT", "9100"),
            ("DOWNLOAD_DIR", "/srv/media"),
            ("FFMPEG_LOCATION", "/opt/ffmpeg/bin"),
            ("DOWNLOAD_TIMEOUT_SECS", "120"),
        ]);
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.runner().download_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.runner().download_timeout_secs, 120);
        assert_eq!(config.ytdlp().ffmpeg_location.as_deref(), Some("/opt/ffmpeg/bin"));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = config_from(&[("API_PORT", "eighty"), ("MAX_CONCURRENT_DOWNLOADS", "0")]);
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.max_concurrent_downloads, 1);
    }
}
