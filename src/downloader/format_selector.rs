// FormatSelector - ordered format preference for one request
//
// Preferences are kept as typed expressions and only turned into yt-dlp's
// `-f` grammar at the engine boundary, so the policy can be tested against a
// catalogue without running the engine.
//
// Handles:
// - Audio-only requests (codec preference, bitrate floor, any audio, small combined)
// - "best" video requests (merge in the target container when possible)
// - Explicit format ids that may be video-only, audio-only or combined

use std::fmt;

use serde::Serialize;

use super::models::{MediaFormat, BEST_FORMAT, MERGE_CONTAINER};

/// Minimum audio bitrate (kbps) for the second audio tier
pub const AUDIO_BITRATE_FLOOR: u32 = 128;

/// Resolution ceiling for the capped merge alternative
pub const MERGE_HEIGHT_CAP: u32 = 1080;

/// Resolution ceiling for the combined-stream last resort of audio requests
pub const AUDIO_FALLBACK_HEIGHT_CAP: u32 = 480;

/// Which stream a selector picks before filters are applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    /// Best stream carrying video and audio, or anything when none does
    Best,
    /// Best video-only stream
    BestVideo,
    /// Best audio-only stream
    BestAudio,
    /// Catalogue format id, whatever it carries
    Id(String),
}

/// Attribute filter applied to a stream selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Predicate {
    Ext(String),
    AudioCodecPrefix(String),
    FormatId(String),
    MaxHeight(u32),
    MinAudioBitrate(u32),
}

impl Predicate {
    fn matches(&self, format: &MediaFormat) -> bool {
        match self {
            Self::Ext(ext) => format.ext == *ext,
            Self::AudioCodecPrefix(prefix) => format
                .acodec
                .as_deref()
                .is_some_and(|a| a.starts_with(prefix.as_str())),
            Self::FormatId(id) => format.format_id == *id,
            // yt-dlp drops formats with an unknown value for a plain comparison
            Self::MaxHeight(max) => format.height.is_some_and(|h| h <= *max),
            Self::MinAudioBitrate(min) => format.audio_bitrate().is_some_and(|b| b >= *min as f32),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ext(ext) => write!(f, "[ext={ext}]"),
            Self::AudioCodecPrefix(prefix) => write!(f, "[acodec^={prefix}]"),
            Self::FormatId(id) => write!(f, "[format_id={id}]"),
            Self::MaxHeight(max) => write!(f, "[height<={max}]"),
            Self::MinAudioBitrate(min) => write!(f, "[abr>={min}]"),
        }
    }
}

/// A stream selector with its filters, e.g. `bestaudio[ext=m4a]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSpec {
    pub kind: StreamKind,
    pub filters: Vec<Predicate>,
}

impl StreamSpec {
    pub fn best() -> Self {
        Self::of(StreamKind::Best)
    }

    pub fn best_video() -> Self {
        Self::of(StreamKind::BestVideo)
    }

    pub fn best_audio() -> Self {
        Self::of(StreamKind::BestAudio)
    }

    pub fn id(format_id: &str) -> Self {
        Self::of(StreamKind::Id(format_id.to_string()))
    }

    fn of(kind: StreamKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
        }
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// `best` with no filters: matches something whenever the catalogue is non-empty
    pub fn is_unconditional(&self) -> bool {
        self.kind == StreamKind::Best && self.filters.is_empty()
    }

    pub fn carries_video(&self) -> bool {
        matches!(self.kind, StreamKind::Best | StreamKind::BestVideo)
    }

    pub fn carries_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Best | StreamKind::BestAudio)
    }

    /// Pick the stream this selector resolves to in `formats`
    pub fn pick<'a>(&self, formats: &'a [MediaFormat]) -> Option<&'a MediaFormat> {
        let filtered: Vec<&MediaFormat> = formats
            .iter()
            .filter(|f| self.filters.iter().all(|p| p.matches(f)))
            .collect();

        let role: Vec<&MediaFormat> = match &self.kind {
            StreamKind::Best => {
                let combined: Vec<&MediaFormat> =
                    filtered.iter().copied().filter(|f| f.is_combined()).collect();
                if combined.is_empty() {
                    filtered
                } else {
                    combined
                }
            }
            StreamKind::BestVideo => filtered.into_iter().filter(|f| f.is_video_only()).collect(),
            StreamKind::BestAudio => filtered.into_iter().filter(|f| f.is_audio_only()).collect(),
            StreamKind::Id(id) => filtered.into_iter().filter(|f| f.format_id == *id).collect(),
        };

        if self.kind == StreamKind::BestAudio {
            role.into_iter().max_by_key(|f| audio_rank(f))
        } else {
            role.into_iter().max_by_key(|f| video_rank(f))
        }
    }
}

fn kbps_key(value: Option<f32>) -> u64 {
    value.map_or(0, |v| (v.max(0.0) * 1000.0) as u64)
}

fn audio_rank(format: &MediaFormat) -> (u64, u64) {
    (kbps_key(format.audio_bitrate()), kbps_key(format.tbr))
}

fn video_rank(format: &MediaFormat) -> (u32, u64) {
    (format.height.unwrap_or(0), kbps_key(format.tbr))
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StreamKind::Best => write!(f, "best")?,
            StreamKind::BestVideo => write!(f, "bestvideo")?,
            StreamKind::BestAudio => write!(f, "bestaudio")?,
            StreamKind::Id(id) => write!(f, "{id}")?,
        }
        for predicate in &self.filters {
            write!(f, "{predicate}")?;
        }
        Ok(())
    }
}

/// One alternative of a preference: a single stream, or video + audio to merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Alternative {
    Single(StreamSpec),
    Merge { video: StreamSpec, audio: StreamSpec },
}

impl Alternative {
    fn merge(video: StreamSpec, audio: StreamSpec) -> Self {
        Self::Merge { video, audio }
    }

    pub fn is_unconditional(&self) -> bool {
        matches!(self, Self::Single(spec) if spec.is_unconditional())
    }

    /// Whether this alternative explicitly asks for a video and an audio component
    pub fn requires_video_and_audio(&self) -> bool {
        match self {
            Self::Merge { video, audio } => video.carries_video() && audio.carries_audio(),
            Self::Single(_) => false,
        }
    }

    pub fn select<'a>(&self, formats: &'a [MediaFormat]) -> Option<Selection<'a>> {
        match self {
            Self::Single(spec) => spec.pick(formats).map(Selection::Single),
            Self::Merge { video, audio } => {
                let video = video.pick(formats)?;
                let audio = audio.pick(formats)?;
                // the engine refuses a merge whose first part has no video
                if !video.has_video() || video.format_id == audio.format_id {
                    return None;
                }
                Some(Selection::Merged { video, audio })
            }
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(spec) => write!(f, "{spec}"),
            Self::Merge { video, audio } => write!(f, "{video}+{audio}"),
        }
    }
}

/// What an alternative resolved to against a concrete catalogue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    Single(&'a MediaFormat),
    Merged {
        video: &'a MediaFormat,
        audio: &'a MediaFormat,
    },
}

impl Selection<'_> {
    pub fn format_ids(&self) -> String {
        match self {
            Self::Single(f) => f.format_id.clone(),
            Self::Merged { video, audio } => format!("{}+{}", video.format_id, audio.format_id),
        }
    }
}

/// Ordered alternatives, most preferred first, always ending in unconditional `best`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatPreference {
    alternatives: Vec<Alternative>,
    /// Container for the mux step when a merge alternative wins
    merge_container: Option<String>,
}

impl FormatPreference {
    /// Build a preference; duplicates are dropped and the unconditional tail is guaranteed.
    pub fn new(alternatives: Vec<Alternative>, merge_container: Option<String>) -> Self {
        let mut deduped: Vec<Alternative> = Vec::with_capacity(alternatives.len() + 1);
        for alt in alternatives {
            if !deduped.contains(&alt) {
                deduped.push(alt);
            }
        }
        // the tail must be the only unconditional entry
        deduped.retain(|a| !a.is_unconditional());
        deduped.push(Alternative::Single(StreamSpec::best()));

        Self {
            alternatives: deduped,
            merge_container,
        }
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    pub fn merge_container(&self) -> Option<&str> {
        self.merge_container.as_deref()
    }

    /// A mux step is needed when any alternative combines two streams
    pub fn requires_merge(&self) -> bool {
        self.alternatives
            .iter()
            .any(|a| matches!(a, Alternative::Merge { .. }))
    }

    /// Serialize to yt-dlp's `-f` grammar
    pub fn to_engine_syntax(&self) -> String {
        self.alternatives
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve against a catalogue the way the engine walks the alternatives.
    ///
    /// Returns the index of the winning alternative and what it picked.
    pub fn select<'a>(&self, formats: &'a [MediaFormat]) -> Option<(usize, Selection<'a>)> {
        self.alternatives
            .iter()
            .enumerate()
            .find_map(|(idx, alt)| alt.select(formats).map(|sel| (idx, sel)))
    }

    /// Simplified preference for the fallback attempt
    pub fn fallback(target_container: &str, audio_only: bool) -> Self {
        if audio_only {
            Self::new(vec![Alternative::Single(StreamSpec::best_audio())], None)
        } else {
            Self::new(
                vec![Alternative::Single(
                    StreamSpec::best().with(Predicate::Ext(target_container.to_string())),
                )],
                None,
            )
        }
    }
}

impl fmt::Display for FormatPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_engine_syntax())
    }
}

/// Build the ordered preference for a request
pub fn select_formats(
    format_id: &str,
    target_container: &str,
    audio_only: bool,
) -> FormatPreference {
    if audio_only {
        return audio_preference();
    }

    if format_id == BEST_FORMAT {
        best_video_preference(target_container)
    } else {
        explicit_id_preference(format_id, target_container)
    }
}

fn audio_preference() -> FormatPreference {
    use Alternative::Single;

    FormatPreference::new(
        vec![
            // AAC needs no re-encode before the mp3 step and covers m4a/aac containers
            Single(StreamSpec::best_audio().with(Predicate::AudioCodecPrefix("mp4a".into()))),
            Single(StreamSpec::best_audio().with(Predicate::MinAudioBitrate(AUDIO_BITRATE_FLOOR))),
            Single(StreamSpec::best_audio()),
            Single(StreamSpec::best().with(Predicate::MaxHeight(AUDIO_FALLBACK_HEIGHT_CAP))),
        ],
        None,
    )
}

fn best_video_preference(container: &str) -> FormatPreference {
    if container == MERGE_CONTAINER {
        FormatPreference::new(
            vec![
                Alternative::merge(
                    StreamSpec::best_video().with(Predicate::Ext(MERGE_CONTAINER.into())),
                    StreamSpec::best_audio().with(Predicate::Ext("m4a".into())),
                ),
                Alternative::merge(
                    StreamSpec::best_video().with(Predicate::MaxHeight(MERGE_HEIGHT_CAP)),
                    StreamSpec::best_audio(),
                ),
                Alternative::Single(
                    StreamSpec::best().with(Predicate::Ext(MERGE_CONTAINER.into())),
                ),
            ],
            Some(MERGE_CONTAINER.to_string()),
        )
    } else {
        FormatPreference::new(
            vec![Alternative::Single(
                StreamSpec::best().with(Predicate::Ext(container.to_string())),
            )],
            None,
        )
    }
}

// An id may name a video-only, audio-only or combined stream depending on the
// catalogue, so every interpretation is tried in turn.
fn explicit_id_preference(format_id: &str, container: &str) -> FormatPreference {
    let mut alternatives = Vec::new();

    if container == MERGE_CONTAINER {
        alternatives.push(Alternative::merge(
            StreamSpec::id(format_id),
            StreamSpec::best_audio().with(Predicate::Ext("m4a".into())),
        ));
    }
    alternatives.push(Alternative::merge(StreamSpec::id(format_id), StreamSpec::best_audio()));
    alternatives.push(Alternative::merge(
        StreamSpec::best_video().with(Predicate::FormatId(format_id.to_string())),
        StreamSpec::best_audio(),
    ));
    alternatives.push(Alternative::Single(
        StreamSpec::best().with(Predicate::FormatId(format_id.to_string())),
    ));
    alternatives.push(Alternative::Single(StreamSpec::id(format_id)));
    alternatives.push(Alternative::Single(
        StreamSpec::best().with(Predicate::Ext(container.to_string())),
    ));

    FormatPreference::new(alternatives, Some(container.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, ext: &str, height: u32, tbr: f32) -> MediaFormat {
        MediaFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            height: Some(height),
            vcodec: Some("avc1.640028".to_string()),
            acodec: Some("none".to_string()),
            tbr: Some(tbr),
            ..Default::default()
        }
    }

    fn audio(id: &str, ext: &str, acodec: &str, abr: f32) -> MediaFormat {
        MediaFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            vcodec: Some("none".to_string()),
            acodec: Some(acodec.to_string()),
            abr: Some(abr),
            ..Default::default()
        }
    }

    fn combined(id: &str, ext: &str, height: u32) -> MediaFormat {
        MediaFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            height: Some(height),
            vcodec: Some("avc1.42001E".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn best_mp4_first_alternative_needs_video_and_audio() {
        let pref = select_formats("best", "mp4", false);
        assert!(pref.alternatives()[0].requires_video_and_audio());
        assert_eq!(pref.merge_container(), Some("mp4"));
        assert_eq!(
            pref.to_engine_syntax(),
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<=1080]+bestaudio/best[ext=mp4]/best"
        );
    }

    #[test]
    fn selections_compare_by_resolved_formats() {
        let formats = vec![
            video("137", "mp4", 1080, 4000.0),
            audio("140", "m4a", "mp4a.40.2", 129.5),
        ];
        let pref = select_formats("best", "mp4", false);

        assert_eq!(
            pref.select(&formats),
            Some((0, Selection::Merged { video: &formats[0], audio: &formats[1] }))
        );
        assert_ne!(Selection::Single(&formats[0]), Selection::Single(&formats[1]));
    }

    #[test]
    fn best_other_container_prefers_native_stream() {
        let pref = select_formats("best", "webm", false);
        assert_eq!(pref.to_engine_syntax(), "best[ext=webm]/best");
        assert!(!pref.requires_merge());
        assert_eq!(pref.merge_container(), None);
    }

    #[test]
    fn explicit_id_degrades_through_interpretations() {
        for container in ["mp4", "webm", "mkv"] {
            let pref = select_formats("137", container, false);
            let alts = pref.alternatives();

            assert!(alts.len() >= 4, "{container}: {pref}");
            assert!(alts.last().unwrap().is_unconditional());
            assert!(matches!(alts[0], Alternative::Merge { .. }));
            for (i, a) in alts.iter().enumerate() {
                assert!(!alts[i + 1..].contains(a), "duplicate alternative {a}");
            }
        }
    }

    #[test]
    fn explicit_id_mp4_syntax() {
        let pref = select_formats("694", "mp4", false);
        assert_eq!(
            pref.to_engine_syntax(),
            "694+bestaudio[ext=m4a]/694+bestaudio/bestvideo[format_id=694]+bestaudio/best[format_id=694]/694/best[ext=mp4]/best"
        );
        assert!(pref.requires_merge());
    }

    #[test]
    fn explicit_id_on_audio_only_catalogue_entry_still_resolves() {
        // id names an audio-only stream; the merge tiers need a video part and fail
        let formats = vec![audio("140", "m4a", "mp4a.40.2", 128.0), combined("18", "mp4", 360)];
        let pref = select_formats("140", "mp4", false);
        let (idx, sel) = pref.select(&formats).unwrap();

        assert!(matches!(pref.alternatives()[idx], Alternative::Single(_)));
        assert_eq!(sel.format_ids(), "140");
    }

    #[test]
    fn explicit_id_video_only_is_merged_with_m4a() {
        let formats = vec![
            video("137", "mp4", 1080, 4000.0),
            audio("140", "m4a", "mp4a.40.2", 128.0),
            audio("251", "webm", "opus", 160.0),
        ];
        let pref = select_formats("137", "mp4", false);
        let (idx, sel) = pref.select(&formats).unwrap();

        assert_eq!(idx, 0);
        assert_eq!(sel.format_ids(), "137+140");
    }

    #[test]
    fn audio_preference_order() {
        let pref = select_formats("best", "mp3", true);
        assert_eq!(
            pref.to_engine_syntax(),
            "bestaudio[acodec^=mp4a]/bestaudio[abr>=128]/bestaudio/best[height<=480]/best"
        );
        assert_eq!(pref.merge_container(), None);
    }

    #[test]
    fn audio_bitrate_floor_skipped_for_low_bitrate_catalogue() {
        let formats = vec![
            audio("249", "webm", "opus", 96.0),
            video("137", "mp4", 1080, 4000.0),
        ];
        let pref = select_formats("best", "mp3", true);

        assert!(pref.alternatives()[1].select(&formats).is_none());
        let (idx, sel) = pref.select(&formats).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(sel.format_ids(), "249");
    }

    #[test]
    fn audio_falls_back_to_small_combined_stream() {
        let formats = vec![combined("22", "mp4", 720), combined("18", "mp4", 360)];
        let pref = select_formats("best", "mp3", true);
        let (idx, sel) = pref.select(&formats).unwrap();

        assert_eq!(idx, 3);
        assert_eq!(sel.format_ids(), "18");
    }

    #[test]
    fn unconditional_tail_picks_from_any_non_empty_catalogue() {
        let formats = vec![video("137", "mp4", 1080, 4000.0)];
        for pref in [
            select_formats("999", "webm", false),
            select_formats("best", "mp3", true),
            select_formats("best", "mkv", false),
        ] {
            assert!(pref.select(&formats).is_some(), "{pref}");
        }
        assert!(select_formats("best", "mp4", false).select(&[]).is_none());
    }

    #[test]
    fn fallback_preferences_are_simple() {
        assert_eq!(FormatPreference::fallback("mp4", true).to_engine_syntax(), "bestaudio/best");
        assert_eq!(
            FormatPreference::fallback("mp4", false).to_engine_syntax(),
            "best[ext=mp4]/best"
        );
        assert_eq!(
            FormatPreference::fallback("webm", false).to_engine_syntax(),
            "best[ext=webm]/best"
        );
    }

    #[test]
    fn new_keeps_single_unconditional_tail() {
        let pref = FormatPreference::new(
            vec![
                Alternative::Single(StreamSpec::best()),
                Alternative::Single(StreamSpec::best_audio()),
                Alternative::Single(StreamSpec::best_audio()),
            ],
            None,
        );
        assert_eq!(pref.to_engine_syntax(), "bestaudio/best");
    }
}
