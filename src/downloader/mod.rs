// Downloader module - format selection, post-processing plan, progress,
// orchestration with fallback and artifact resolution

pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod post_process;
pub mod progress;
pub mod resolver;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use format_selector::{select_formats, FormatPreference};
pub use models::{DownloadOutcome, DownloadRequest, MediaFormat, MediaInfo, ProgressEvent};
pub use orchestrator::{should_fallback, Downloader};
pub use post_process::{plan_post_process, PostProcessSpec};
pub use resolver::ArtifactResolver;
pub use traits::{EngineJob, ExtractionEngine, ProgressHook, ProgressSink};
