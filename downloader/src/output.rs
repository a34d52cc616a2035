/// Locating a job's produced file inside its own output directory.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

/// Extensions of files yt-dlp is still writing or has abandoned.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

/// Resolve the final file of a job.
///
/// Tries the path yt-dlp reported (absolute, or relative to the job
/// directory), then the newest complete file in the job directory. Paths
/// that resolve outside the job directory are never returned.
pub async fn resolve_output_file(
    job_dir: &Path,
    reported: Option<&Path>,
) -> std::io::Result<Option<PathBuf>> {
    let canonical_dir = match tokio::fs::canonicalize(job_dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if let Some(path) = reported {
        if let Some(found) = candidate_inside(&canonical_dir, path).await? {
            return Ok(Some(found));
        }
        if path.is_relative() {
            if let Some(found) = candidate_inside(&canonical_dir, &job_dir.join(path)).await? {
                return Ok(Some(found));
            }
        }
        warn!("Reported output {:?} not usable, scanning {:?}", path, job_dir);
    }

    newest_complete_file(&canonical_dir).await
}

async fn candidate_inside(canonical_dir: &Path, candidate: &Path) -> std::io::Result<Option<PathBuf>> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate).await?;
    if !canonical.starts_with(canonical_dir) {
        warn!("Refusing file outside job directory: {:?}", canonical);
        return Ok(None);
    }
    Ok(Some(canonical))
}

async fn newest_complete_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_partial(&path) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PARTIAL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reported_path_inside_job_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"data").unwrap();

        let found = resolve_output_file(dir.path(), Some(file.as_path())).await.unwrap();
        assert_eq!(found, Some(std::fs::canonicalize(&file).unwrap()));
    }

    #[tokio::test]
    async fn test_relative_reported_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"data").unwrap();

        let found = resolve_output_file(dir.path(), Some(Path::new("song.mp3"))).await.unwrap();
        assert_eq!(found.unwrap().file_name().unwrap(), "song.mp3");
    }

    #[tokio::test]
    async fn test_reported_path_outside_is_refused() {
        let job = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let foreign = elsewhere.path().join("secret.mp4");
        std::fs::write(&foreign, b"nope").unwrap();

        let found = resolve_output_file(job.path(), Some(foreign.as_path())).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_scan_ignores_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"done").unwrap();
        std::fs::write(dir.path().join("clip.f137.mp4.part"), b"half").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let found = resolve_output_file(dir.path(), None).await.unwrap();
        assert_eq!(found.unwrap().file_name().unwrap(), "clip.mp4");
    }

    #[tokio::test]
    async fn test_missing_report_falls_back_to_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("final.mp3"), b"done").unwrap();

        let found = resolve_output_file(dir.path(), Some(Path::new("/nonexistent/final.webm")))
            .await
            .unwrap();
        assert_eq!(found.unwrap().file_name().unwrap(), "final.mp3");
    }

    #[tokio::test]
    async fn test_empty_or_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_output_file(dir.path(), None).await.unwrap().is_none());

        let gone = dir.path().join("never-created");
        assert!(resolve_output_file(&gone, None).await.unwrap().is_none());
    }
}
