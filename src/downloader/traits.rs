// Engine and progress seams

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use super::errors::DownloadError;
use super::format_selector::FormatPreference;
use super::models::{MediaInfo, ProgressEvent};
use super::post_process::PostProcessSpec;

/// Which attempt of a run a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Primary,
    Fallback,
}

/// Everything the engine needs for one download attempt
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub url: String,
    pub preference: FormatPreference,
    pub post_process: PostProcessSpec,
    /// Rendered output template (`-o`)
    pub output_template: String,
    pub attempt: AttemptKind,
}

/// Receives raw status records from the engine while it runs.
///
/// Called synchronously from inside [`ExtractionEngine::download`]; must not block.
pub trait ProgressHook: Send {
    fn on_status(&mut self, status: &Value);
}

/// Out-of-band channel for normalized progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: &ProgressEvent) {
        // receiver gone means nobody is listening; progress is best-effort
        let _ = self.send(event.clone());
    }
}

/// External extraction/transcoding engine
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Resolve a URL into metadata and its format catalogue without downloading
    async fn extract_metadata(&self, url: &str) -> Result<MediaInfo, DownloadError>;

    /// Run one download attempt, reporting status through `hook`
    async fn download(
        &self,
        job: &EngineJob,
        hook: &mut dyn ProgressHook,
    ) -> Result<(), DownloadError>;
}
