// Post-processing plan handed to the engine's ffmpeg step

use serde::Serialize;

use super::models::{AUDIO_CONTAINER, MERGE_CONTAINER};

/// Bitrate of the primary mp3 extraction (kbps)
pub const AUDIO_QUALITY_KBPS: u32 = 192;

/// Bitrate of the fallback mp3 extraction (kbps)
pub const FALLBACK_AUDIO_QUALITY_KBPS: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostProcessKind {
    AudioExtract,
    VideoConvert,
    None,
}

/// Transcoding directive; computed once per attempt and passed on verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostProcessSpec {
    pub kind: PostProcessKind,
    pub target_codec: Option<String>,
    pub target_container: Option<String>,
    /// Audio quality for extraction, in kbps
    pub audio_quality_kbps: Option<u32>,
    /// ffmpeg output arguments, in order
    pub transcode_args: Vec<String>,
}

impl PostProcessSpec {
    pub fn none() -> Self {
        Self {
            kind: PostProcessKind::None,
            target_codec: None,
            target_container: None,
            audio_quality_kbps: None,
            transcode_args: Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == PostProcessKind::None
    }

    /// Lower-effort mp3 extraction used by the fallback attempt
    pub fn fallback(audio_only: bool) -> Self {
        if audio_only {
            Self {
                kind: PostProcessKind::AudioExtract,
                target_codec: Some(AUDIO_CONTAINER.to_string()),
                target_container: Some(AUDIO_CONTAINER.to_string()),
                audio_quality_kbps: Some(FALLBACK_AUDIO_QUALITY_KBPS),
                transcode_args: Vec::new(),
            }
        } else {
            Self::none()
        }
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Plan post-processing for a request.
///
/// Independent of the format preference; both feed the same engine call.
// ffmpeg arguments stay laid out as flag/value pairs
#[rustfmt::skip]
pub fn plan_post_process(target_container: &str, audio_only: bool) -> PostProcessSpec {
    if audio_only {
        return PostProcessSpec {
            kind: PostProcessKind::AudioExtract,
            target_codec: Some(AUDIO_CONTAINER.to_string()),
            target_container: Some(AUDIO_CONTAINER.to_string()),
            audio_quality_kbps: Some(AUDIO_QUALITY_KBPS),
            transcode_args: args(&[
                "-c:a", "libmp3lame",
                "-q:a", "2",
                "-b:a", "192k",
                "-ar", "44100",
                "-ac", "2",
                "-f", "mp3",
                "-id3v2_version", "3",
                "-write_id3v1", "1",
                "-avoid_negative_ts", "make_zero",
                "-fflags", "+bitexact",
                "-map_metadata", "0",
            ]),
        };
    }

    if target_container == MERGE_CONTAINER {
        return PostProcessSpec {
            kind: PostProcessKind::VideoConvert,
            target_codec: Some("libx264".to_string()),
            target_container: Some(MERGE_CONTAINER.to_string()),
            audio_quality_kbps: None,
            transcode_args: args(&[
                "-c:v", "libx264",
                "-c:a", "aac",
                "-b:a", "128k",
                "-ar", "44100",
                "-ac", "2",
                "-preset", "fast",
                "-crf", "23",
                "-movflags", "+faststart",
                "-avoid_negative_ts", "make_zero",
                "-fflags", "+bitexact",
            ]),
        };
    }

    PostProcessSpec::none()
}
