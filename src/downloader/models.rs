// Common data models for the download pipeline

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Sentinel format id meaning "let the selector pick"
pub const BEST_FORMAT: &str = "best";

/// Container that can hold independently sourced video and audio without re-encoding
pub const MERGE_CONTAINER: &str = "mp4";

/// Container produced by the audio extraction step
pub const AUDIO_CONTAINER: &str = "mp3";

/// Where the engine writes its output.
///
/// Every file of one run is named `<prefix>_<title>.<ext>` inside `dir`, so the
/// prefix doubles as the key for the resolver's directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    pub dir: PathBuf,
    pub prefix: String,
}

impl OutputTemplate {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// File name prefix shared by every artifact of this run
    pub fn file_prefix(&self) -> String {
        format!("{}_", self.prefix)
    }

    /// yt-dlp output template (`-o`)
    pub fn render(&self) -> String {
        self.dir
            .join(format!("{}%(title)s.%(ext)s", self.file_prefix()))
            .to_string_lossy()
            .to_string()
    }
}

/// One download request, immutable for the whole run
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Catalogue format id, or [`BEST_FORMAT`]
    pub format_id: String,
    /// Target container extension (mp4, webm, mp3...)
    pub target_container: String,
    pub audio_only: bool,
    pub output: OutputTemplate,
}

/// One entry of the engine's format catalogue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Format ID (e.g., "137", "140")
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    pub ext: String,
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    /// Video codec (avc1, vp9, av01, none)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    pub format_note: Option<String>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec
        .as_deref()
        .is_some_and(|c| !c.is_empty() && c != "none")
}

impl MediaFormat {
    pub fn has_video(&self) -> bool {
        codec_present(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        codec_present(&self.acodec)
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video() && !self.has_audio()
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    pub fn is_combined(&self) -> bool {
        self.has_video() && self.has_audio()
    }

    /// Exact or approximate size
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    /// Audio bitrate, falling back to total bitrate for audio-only streams
    pub fn audio_bitrate(&self) -> Option<f32> {
        self.abr
            .or_else(|| if self.is_audio_only() { self.tbr } else { None })
    }
}

/// Resource metadata returned by the engine without downloading
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub upload_date: Option<String>,
    pub formats: Vec<MediaFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Downloading,
    Finished,
}

/// Normalized progress record sent on the progress channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub phase: ProgressPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bytes_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ProgressEvent {
    pub fn downloading(percent: f64, eta_seconds: Option<i64>, speed: Option<f64>) -> Self {
        Self {
            phase: ProgressPhase::Downloading,
            percent: Some(percent),
            eta_seconds,
            speed_bytes_per_sec: speed,
            filename: None,
        }
    }

    pub fn finished(filename: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Finished,
            percent: Some(100.0),
            eta_seconds: None,
            speed_bytes_per_sec: None,
            filename: Some(filename.into()),
        }
    }
}

/// Terminal value handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "filesize", skip_serializing_if = "Option::is_none")]
    pub filesize_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn success(filename: String, filesize_bytes: u64, download_url: String) -> Self {
        Self {
            success: true,
            filename: Some(filename),
            filesize_bytes: Some(filesize_bytes),
            download_url: Some(download_url),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            filename: None,
            filesize_bytes: None,
            download_url: None,
            error: Some(error.into()),
        }
    }
}

/// Per-run state written by the progress reporter and read by the orchestrator.
///
/// Never shared between runs; each call to the orchestrator builds a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub download_started: bool,
    pub final_file_path: Option<PathBuf>,
}

impl AttemptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn final_file_path(&self) -> Option<&Path> {
        self.final_file_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_template_renders_prefix_and_placeholders() {
        let template = OutputTemplate::new("/tmp/downloads", "1754558358888");
        assert_eq!(template.file_prefix(), "1754558358888_");
        assert!(template
            .render()
            .ends_with("1754558358888_%(title)s.%(ext)s"));
    }

    #[test]
    fn outcome_serializes_caller_field_names() {
        let ok = DownloadOutcome::success(
            "a.mp4".to_string(),
            42,
            "/api/serve-file/a.mp4".to_string(),
        );
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["filesize"], 42);
        assert!(json.get("filesizeBytes").is_none());
        assert_eq!(json["downloadUrl"], "/api/serve-file/a.mp4");
        assert!(json.get("error").is_none());

        let err = serde_json::to_value(DownloadOutcome::failure("boom")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "boom");
        assert!(err.get("filename").is_none());
    }

    #[test]
    fn progress_event_json_shape() {
        let event = ProgressEvent::downloading(40.0, Some(12), None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "downloading");
        assert_eq!(json["percent"], 40.0);
        assert_eq!(json["etaSeconds"], 12);
        assert!(json.get("speedBytesPerSec").is_none());
    }

    #[test]
    fn stream_kinds() {
        let audio = MediaFormat {
            vcodec: Some("none".into()),
            acodec: Some("opus".into()),
            tbr: Some(96.0),
            ..Default::default()
        };
        assert!(audio.is_audio_only());
        assert_eq!(audio.audio_bitrate(), Some(96.0));

        let video = MediaFormat {
            vcodec: Some("avc1.640028".into()),
            acodec: Some("none".into()),
            ..Default::default()
        };
        assert!(video.is_video_only());
        assert!(!video.is_combined());
    }
}
