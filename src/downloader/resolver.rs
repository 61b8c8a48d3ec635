// Artifact resolver - finds the file the engine actually left on disk
//
// The engine reports the pre-post-processing name, so the reported path is
// often stale: audio extraction swaps the extension, merges and recodes may
// rename the output. Resolution order:
//   1. the reported path
//   2. (audio only) the reported path with the post-processed extension
//   3. directory scan for the run's file prefix, most recently modified wins
//
// Step 3 is a heuristic: two runs sharing a prefix in the same directory
// cannot be told apart, so callers must keep prefixes unique per run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::models::{DownloadOutcome, OutputTemplate, AUDIO_CONTAINER};

pub const NO_FILE_MESSAGE: &str =
    "No file was downloaded - the media may not be available or the format is not supported";

/// Resolves the final artifact of one run
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    output: OutputTemplate,
    /// Prepended to the file name to build `downloadUrl`
    serve_base: String,
}

impl ArtifactResolver {
    pub fn new(output: OutputTemplate, serve_base: impl Into<String>) -> Self {
        Self {
            output,
            serve_base: serve_base.into(),
        }
    }

    pub fn resolve(&self, final_file_path: Option<&Path>, audio_only: bool) -> DownloadOutcome {
        let Some(reported) = final_file_path else {
            tracing::warn!("engine never reported a finished file");
            return DownloadOutcome::failure(NO_FILE_MESSAGE);
        };

        let resolved = self.locate(reported, audio_only);

        match fs::metadata(&resolved) {
            Ok(meta) if meta.is_file() => {
                let filename = resolved
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                tracing::info!(%filename, size = meta.len(), "resolved artifact");
                let url = format!("{}{}", self.serve_base, filename);
                DownloadOutcome::success(filename, meta.len(), url)
            }
            _ => DownloadOutcome::failure(format!(
                "Download completed but file not found: {}",
                resolved.display()
            )),
        }
    }

    /// Best guess at the real path; may still not exist
    pub fn locate(&self, reported: &Path, audio_only: bool) -> PathBuf {
        if reported.is_file() {
            return reported.to_path_buf();
        }

        let mut candidate = reported.to_path_buf();
        if audio_only {
            candidate = reported.with_extension(AUDIO_CONTAINER);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "found post-processed audio");
                return candidate;
            }
        }

        match self.scan_for_prefix() {
            Some(found) => {
                tracing::info!(path = %found.display(), "found file via directory search");
                found
            }
            None => candidate,
        }
    }

    /// Most recently modified file in the output directory carrying this run's prefix
    pub fn scan_for_prefix(&self) -> Option<PathBuf> {
        let prefix = self.output.file_prefix();
        let entries = match fs::read_dir(&self.output.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.output.dir.display(), "cannot scan output dir: {e}");
                return None;
            }
        };

        entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, e.path()))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, path)| path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn resolver(dir: &Path) -> ArtifactResolver {
        ArtifactResolver::new(OutputTemplate::new(dir, "1754558358888"), "/api/serve-file/")
    }

    fn touch(path: &Path, bytes: &[u8]) {
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn missing_path_means_nothing_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = resolver(dir.path()).resolve(None, false);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(NO_FILE_MESSAGE));
    }

    #[test]
    fn existing_reported_path_is_returned_without_scan() {
        let dir = tempfile::tempdir().unwrap();
        let reported = dir.path().join("1754558358888_clip.mp4");
        touch(&reported, b"12345");
        // a newer prefixed file must not win over an existing reported path
        std::thread::sleep(Duration::from_millis(20));
        touch(&dir.path().join("1754558358888_other.mp4"), b"x");

        let outcome = resolver(dir.path()).resolve(Some(&reported), false);
        assert!(outcome.success);
        assert_eq!(outcome.filename.as_deref(), Some("1754558358888_clip.mp4"));
        assert_eq!(outcome.filesize_bytes, Some(5));
        assert_eq!(
            outcome.download_url.as_deref(),
            Some("/api/serve-file/1754558358888_clip.mp4")
        );
        assert!(outcome.error.is_none());
    }

    #[test]
    fn audio_extension_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let reported = dir.path().join("video.m4a");
        touch(&dir.path().join("video.mp3"), b"id3");

        let outcome = resolver(dir.path()).resolve(Some(&reported), true);
        assert!(outcome.success);
        assert_eq!(outcome.filename.as_deref(), Some("video.mp3"));
    }

    #[test]
    fn extension_rewrite_only_for_audio() {
        let dir = tempfile::tempdir().unwrap();
        let reported = dir.path().join("video.m4a");
        touch(&dir.path().join("video.mp3"), b"id3");

        let outcome = resolver(dir.path()).resolve(Some(&reported), false);
        assert!(!outcome.success);
    }

    #[test]
    fn prefix_scan_recovers_renamed_output() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("1754558358888_Some_Title.mp4"), b"data");
        touch(&dir.path().join("999_unrelated.mp4"), b"data");

        let reported = dir.path().join("1754558358888_Some_Title.f137.mp4");
        let outcome = resolver(dir.path()).resolve(Some(&reported), false);

        assert!(outcome.success);
        assert_eq!(outcome.filename.as_deref(), Some("1754558358888_Some_Title.mp4"));
    }

    #[test]
    fn prefix_scan_prefers_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("1754558358888_a.webm"), b"old");
        std::thread::sleep(Duration::from_millis(50));
        touch(&dir.path().join("1754558358888_a.mp4"), b"new");

        let found = resolver(dir.path()).scan_for_prefix().unwrap();
        assert_eq!(found.file_name().unwrap(), "1754558358888_a.mp4");
    }

    #[test]
    fn unresolvable_reports_searched_path() {
        let dir = tempfile::tempdir().unwrap();
        let reported = dir.path().join("gone.m4a");

        let outcome = resolver(dir.path()).resolve(Some(&reported), true);
        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("Download completed but file not found: "));
        assert!(error.ends_with("gone.mp3"));
    }
}
