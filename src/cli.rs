//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{DownloadRequest, OutputTemplate, AUDIO_CONTAINER, BEST_FORMAT};
use crate::downloader::orchestrator::DEFAULT_SERVE_BASE;
use crate::ytdlp::EngineConfig;

#[derive(Debug, Parser)]
#[command(name = "youtube-mp4")]
#[command(about = "Download one video or audio track through yt-dlp")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download a single resource and print the outcome as JSON
    Download(DownloadArgs),

    /// Print metadata and the format catalogue as JSON
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct EngineArgs {
    /// yt-dlp binary (discovered in common locations when unset)
    #[arg(long = "yt-dlp", env = "YTDLP_PATH", global = true)]
    pub ytdlp_path: Option<String>,

    /// Python interpreter to run yt-dlp as a module (e.g. a venv python)
    #[arg(long, env = "YTDLP_PYTHON", global = true)]
    pub python: Option<String>,

    /// Proxy URL passed to yt-dlp
    #[arg(long, env = "YTDLP_PROXY", global = true)]
    pub proxy: Option<String>,

    /// Socket timeout in seconds
    #[arg(long, default_value_t = 15, global = true)]
    pub socket_timeout: u32,

    /// Time limit for metadata extraction in seconds
    #[arg(long, default_value_t = 60, global = true)]
    pub probe_timeout: u64,
}

impl EngineArgs {
    pub fn to_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_ytdlp_path(self.ytdlp_path.clone())
            .with_python(self.python.clone())
            .with_proxy(self.proxy.clone())
            .with_socket_timeout(Some(self.socket_timeout))
            .with_probe_timeout(self.probe_timeout)
    }
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Resource URL
    pub url: String,

    /// Catalogue format id, or "best"
    #[arg(short = 'f', long, default_value = BEST_FORMAT)]
    pub format_id: String,

    /// Target container (mp4, webm, mkv, mp3...)
    #[arg(short, long, default_value = "mp4")]
    pub container: String,

    /// Extract audio as mp3 (implied by --container mp3)
    #[arg(short, long)]
    pub audio_only: bool,

    /// Output directory [default: <downloads>/youtube-mp4]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// File name prefix for this run [default: unix time in ms]
    #[arg(long)]
    pub prefix: Option<String>,

    /// Prefix of the reported download URL
    #[arg(long, default_value = DEFAULT_SERVE_BASE)]
    pub serve_base: String,
}

impl DownloadArgs {
    pub fn into_request(self) -> Result<DownloadRequest, DownloadError> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("URL is required".to_string()));
        }

        let format_id = self.format_id.trim().to_string();
        if format_id.is_empty() {
            return Err(DownloadError::InvalidRequest("Format ID is required".to_string()));
        }

        let target_container = self.container.trim().to_lowercase();
        if target_container.is_empty() {
            return Err(DownloadError::InvalidRequest("Container is required".to_string()));
        }

        let audio_only = self.audio_only || target_container == AUDIO_CONTAINER;

        let dir = self.output_dir.or_else(default_output_dir).ok_or_else(|| {
            DownloadError::InvalidRequest("no output directory could be determined".to_string())
        })?;
        let prefix = self
            .prefix
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(timestamp_prefix);

        Ok(DownloadRequest {
            url,
            format_id,
            target_container,
            audio_only,
            output: OutputTemplate::new(dir, prefix),
        })
    }
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Resource URL
    pub url: String,
}

pub fn default_output_dir() -> Option<PathBuf> {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("youtube-mp4"))
}

/// Current unix time in milliseconds
pub fn timestamp_prefix() -> String {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000).to_string()
}
