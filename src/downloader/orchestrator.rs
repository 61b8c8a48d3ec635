// Orchestrator with fallback logic
//
// Init -> Extract -> PrimaryAttempt -> { Success | FallbackAttempt -> { Success | Fatal } }
//
// A failed primary attempt is retried once with a simplified configuration,
// but only when nothing was downloaded yet. Once bytes have moved the failure
// is most likely in merging or transcoding, and a second run would risk
// duplicate or corrupt output.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::format_selector::{select_formats, FormatPreference};
use super::models::{AttemptState, DownloadOutcome, DownloadRequest, MediaInfo, MERGE_CONTAINER};
use super::post_process::{plan_post_process, PostProcessSpec};
use super::progress::ProgressReporter;
use super::resolver::ArtifactResolver;
use super::traits::{AttemptKind, EngineJob, ExtractionEngine, ProgressSink};

/// Default prefix for `downloadUrl`
pub const DEFAULT_SERVE_BASE: &str = "/api/serve-file/";

/// Result of one engine attempt
#[derive(Debug)]
pub enum AttemptResult {
    Completed,
    Failed {
        error: DownloadError,
        /// A `downloading` status was seen before the failure
        partial_progress: bool,
    },
}

/// Fallback policy: retry only failures that happened before any download progress.
pub fn should_fallback(error: &DownloadError, state: &AttemptState) -> bool {
    if matches!(error, DownloadError::Cancelled) {
        return false;
    }
    !state.download_started
}

pub struct Downloader {
    engine: Arc<dyn ExtractionEngine>,
    serve_base: String,
}

impl Downloader {
    pub fn new(engine: Arc<dyn ExtractionEngine>) -> Self {
        Self {
            engine,
            serve_base: DEFAULT_SERVE_BASE.to_string(),
        }
    }

    pub fn with_serve_base(mut self, serve_base: impl Into<String>) -> Self {
        self.serve_base = serve_base.into();
        self
    }

    /// Run one request end to end.
    ///
    /// `Err` is a fatal failure (metadata, primary-after-progress, fallback,
    /// cancellation). A missing artifact is not an error: it comes back as an
    /// unsuccessful [`DownloadOutcome`].
    pub async fn run(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut state = AttemptState::new();

        tracing::info!(
            url = %request.url,
            engine = self.engine.name(),
            "extracting video information"
        );
        let info = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DownloadError::Cancelled),
            res = self.engine.extract_metadata(&request.url) => res,
        }?;
        log_catalogue(&info, request);

        let preference =
            select_formats(&request.format_id, &request.target_container, request.audio_only);
        let plan = plan_post_process(&request.target_container, request.audio_only);

        match preference.select(&info.formats) {
            Some((idx, sel)) => {
                tracing::info!(
                    format = %preference,
                    alternative = idx,
                    expected = %sel.format_ids(),
                    "starting download"
                )
            }
            None => tracing::warn!(format = %preference, "no alternative matches the catalogue"),
        }

        let primary = self.job(request, preference, plan, AttemptKind::Primary);
        match self.attempt(&primary, &mut state, sink, cancel).await {
            AttemptResult::Completed => {}
            AttemptResult::Failed { error, partial_progress } => {
                tracing::warn!(partial_progress, "primary download failed: {error}");

                if !should_fallback(&error, &state) {
                    return Err(error);
                }

                tracing::info!("attempting fallback download strategy");
                let fallback = self.job(
                    request,
                    FormatPreference::fallback(&request.target_container, request.audio_only),
                    PostProcessSpec::fallback(request.audio_only),
                    AttemptKind::Fallback,
                );
                if let AttemptResult::Failed { error, .. } =
                    self.attempt(&fallback, &mut state, sink, cancel).await
                {
                    tracing::error!("fallback download failed: {error}");
                    return Err(error);
                }
            }
        }

        let resolver = ArtifactResolver::new(request.output.clone(), self.serve_base.clone());
        Ok(resolver.resolve(state.final_file_path(), request.audio_only))
    }

    fn job(
        &self,
        request: &DownloadRequest,
        preference: FormatPreference,
        post_process: PostProcessSpec,
        attempt: AttemptKind,
    ) -> EngineJob {
        EngineJob {
            url: request.url.clone(),
            preference,
            post_process,
            output_template: request.output.render(),
            attempt,
        }
    }

    async fn attempt(
        &self,
        job: &EngineJob,
        state: &mut AttemptState,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        tracing::debug!(
            attempt = ?job.attempt,
            format = %job.preference,
            post = ?job.post_process.kind,
            "engine call"
        );

        let result = {
            let mut reporter = ProgressReporter::new(state, sink);
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(DownloadError::Cancelled),
                res = self.engine.download(job, &mut reporter) => res,
            }
        };

        match result {
            Ok(()) => AttemptResult::Completed,
            Err(error) => AttemptResult::Failed {
                error,
                partial_progress: state.download_started,
            },
        }
    }
}

fn log_catalogue(info: &MediaInfo, request: &DownloadRequest) {
    tracing::info!(
        title = %info.title,
        formats = info.formats.len(),
        "video information extracted"
    );

    for f in info.formats.iter().take(10) {
        tracing::debug!(
            id = %f.format_id,
            ext = %f.ext,
            resolution = f.resolution.as_deref().unwrap_or("?"),
            vcodec = f.vcodec.as_deref().unwrap_or("?"),
            acodec = f.acodec.as_deref().unwrap_or("?"),
            filesize = ?f.filesize,
            "available format"
        );
    }

    if !request.audio_only {
        let has_audio = info.formats.iter().any(|f| f.has_audio());
        tracing::info!(has_audio, "audio formats available");
        if !has_audio && request.target_container == MERGE_CONTAINER {
            tracing::warn!("no dedicated audio formats found, using video-only format");
        }
    }
}
