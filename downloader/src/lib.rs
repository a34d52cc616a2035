//! Vidfetch download engine.
//!
//! Wraps yt-dlp behind the [`extractor::Extractor`] trait and runs
//! download jobs against the shared job store.

pub mod extractor;
pub mod format_selector;
pub mod output;
pub mod progress;
pub mod runner;
pub mod ytdlp;

pub use extractor::Extractor;
pub use runner::{JobRunner, RunnerConfig};
pub use ytdlp::{YtDlp, YtDlpConfig};
