// yt-dlp engine adapter
//
// Drives the yt-dlp CLI (native binary, or `python -m yt_dlp` when an
// interpreter is configured). Progress is requested as JSON through
// `--progress-template`, so status records arrive as one marked line each
// instead of the human-readable `[download]  12.5% of ...` text.

use std::process::Command as StdCommand;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaFormat, MediaInfo};
use crate::downloader::post_process::PostProcessKind;
use crate::downloader::traits::{AttemptKind, EngineJob, ExtractionEngine, ProgressHook};
use crate::downloader::utils::{proxy_args, run_output_with_timeout, spawn_error, timeout_args};

/// Prefix of stdout lines carrying a JSON status record
pub const PROGRESS_MARKER: &str = "[ytm-progress]";

/// Retries for the primary attempt (`--retries`, `--fragment-retries`)
const PRIMARY_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit yt-dlp binary; discovered when unset
    pub ytdlp_path: Option<String>,
    /// Python interpreter; switches to `python -m yt_dlp` when set
    pub python: Option<String>,
    pub proxy: Option<String>,
    /// `--socket-timeout` in seconds
    pub socket_timeout: Option<u32>,
    /// Hard limit for the metadata lookup
    pub probe_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            python: None,
            proxy: None,
            socket_timeout: Some(15),
            probe_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn with_ytdlp_path(mut self, path: Option<String>) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_python(mut self, python: Option<String>) -> Self {
        self.python = python;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_socket_timeout(mut self, seconds: Option<u32>) -> Self {
        self.socket_timeout = seconds;
        self
    }

    pub fn with_probe_timeout(mut self, seconds: u64) -> Self {
        self.probe_timeout_secs = seconds;
        self
    }
}

/// How yt-dlp is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    Binary(String),
    PythonModule(String),
}

impl Launcher {
    fn from_config(config: &EngineConfig) -> Self {
        if let Some(py) = config.python.as_ref().filter(|p| !p.trim().is_empty()) {
            return Launcher::PythonModule(py.clone());
        }
        match config.ytdlp_path.as_ref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Launcher::Binary(path.clone()),
            None => Launcher::Binary(find_ytdlp()),
        }
    }

    pub fn program(&self) -> &str {
        match self {
            Launcher::Binary(path) => path,
            Launcher::PythonModule(py) => py,
        }
    }

    fn base_args(&self) -> Vec<String> {
        match self {
            Launcher::Binary(_) => Vec::new(),
            Launcher::PythonModule(_) => vec!["-m".to_string(), "yt_dlp".to_string()],
        }
    }
}

// Find yt-dlp executable in common paths
fn find_ytdlp() -> String {
    let common_paths = [
        "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
        "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
        "/usr/bin/yt-dlp",          // System installation
    ];

    for path in common_paths {
        if std::path::Path::new(path).exists() {
            return path.to_string();
        }
    }

    if let Ok(output) = StdCommand::new("which").arg("yt-dlp").output() {
        if output.status.success() {
            if let Ok(path) = String::from_utf8(output.stdout) {
                let trimmed = path.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    // Last resort: hope it's in PATH
    "yt-dlp".to_string()
}

pub struct YtDlpEngine {
    config: EngineConfig,
    launcher: Launcher,
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        let launcher = Launcher::from_config(&config);
        tracing::debug!(?launcher, "yt-dlp launcher");
        Self { config, launcher }
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    fn network_args(&self) -> Vec<String> {
        let mut args = proxy_args(self.config.proxy.as_deref());
        args.extend(timeout_args(self.config.socket_timeout));
        args
    }

    fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args = self.launcher.base_args();
        args.extend(
            ["--dump-json", "--no-playlist", "--no-warnings"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.extend(self.network_args());
        args.push(url.to_string());
        args
    }

    /// Full argument list for one download attempt
    pub fn download_args(&self, job: &EngineJob) -> Vec<String> {
        let mut args = self.launcher.base_args();

        args.push("-f".to_string());
        args.push(job.preference.to_engine_syntax());

        if let Some(container) = job.preference.merge_container() {
            args.push("--merge-output-format".to_string());
            args.push(container.to_string());
        }

        let pp = &job.post_process;
        match pp.kind {
            PostProcessKind::AudioExtract => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push(pp.target_codec.clone().unwrap_or_else(|| "mp3".to_string()));
                if let Some(kbps) = pp.audio_quality_kbps {
                    args.push("--audio-quality".to_string());
                    args.push(format!("{kbps}K"));
                }
                if !pp.transcode_args.is_empty() {
                    args.push("--postprocessor-args".to_string());
                    args.push(format!("ExtractAudio+ffmpeg_o:{}", pp.transcode_args.join(" ")));
                }
            }
            PostProcessKind::VideoConvert => {
                if let Some(container) = &pp.target_container {
                    args.push("--recode-video".to_string());
                    args.push(container.clone());
                }
                if !pp.transcode_args.is_empty() {
                    args.push("--postprocessor-args".to_string());
                    args.push(format!("VideoConvertor+ffmpeg_o:{}", pp.transcode_args.join(" ")));
                }
            }
            PostProcessKind::None => {}
        }

        args.extend(
            [
                "-o",
                job.output_template.as_str(),
                "--restrict-filenames",
                "--no-playlist",
                "--newline",
                "--no-warnings",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        if job.attempt == AttemptKind::Primary {
            let retries = PRIMARY_RETRIES.to_string();
            args.push("--retries".to_string());
            args.push(retries.clone());
            args.push("--fragment-retries".to_string());
            args.push(retries);
        }

        args.push("--progress-template".to_string());
        args.push(format!("download:{PROGRESS_MARKER}%(progress)j"));

        args.extend(self.network_args());
        args.push(job.url.clone());
        args
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract_metadata(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let output = run_output_with_timeout(
            self.launcher.program(),
            self.metadata_args(url),
            self.config.probe_timeout_secs,
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(match DownloadError::from(stderr) {
                DownloadError::Engine(msg) => DownloadError::Unresolvable(msg),
                other => other,
            });
        }

        parse_media_info(&output.stdout)
    }

    // Dropping the returned future kills the child (kill_on_drop), which is
    // how cancellation reaches the engine.
    async fn download(
        &self,
        job: &EngineJob,
        hook: &mut dyn ProgressHook,
    ) -> Result<(), DownloadError> {
        let program = self.launcher.program();
        let args = self.download_args(job);
        tracing::debug!(program, ?args, "spawning yt-dlp");

        let mut child = TokioCommand::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                tracing::debug!("stderr read stopped early: {e}");
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        // Raw lines, decoded lossily: titles and paths are not always valid UTF-8
        let mut reader = BufReader::new(stdout);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    match parse_status_line(line) {
                        Some(status) => hook.on_status(&status),
                        None if !line.is_empty() => tracing::debug!(target: "yt-dlp", "{line}"),
                        None => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("stopped reading yt-dlp output: {e}");
                    break;
                }
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        tracing::debug!(code = ?status.code(), "yt-dlp exited with failure");
        Err(DownloadError::from(stderr_output))
    }
}

/// JSON status record from a marked stdout line
pub fn parse_status_line(line: &str) -> Option<Value> {
    let payload = line.trim().strip_prefix(PROGRESS_MARKER)?;
    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(v) if v.is_object() => Some(v),
        _ => None,
    }
}

/// Parse `--dump-json` output
pub fn parse_media_info(stdout: &[u8]) -> Result<MediaInfo, DownloadError> {
    let json_str = String::from_utf8_lossy(stdout);
    if json_str.trim().is_empty() {
        return Err(DownloadError::Unresolvable("No output from yt-dlp".to_string()));
    }

    let json: Value = serde_json::from_str(json_str.trim())
        .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {e}")))?;
    if !json.is_object() {
        return Err(DownloadError::Unresolvable("Invalid response from yt-dlp".to_string()));
    }

    Ok(MediaInfo {
        id: json["id"].as_str().unwrap_or_default().to_string(),
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
        duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
        thumbnail: json["thumbnail"].as_str().unwrap_or_default().to_string(),
        upload_date: json["upload_date"].as_str().and_then(format_upload_date),
        formats: parse_formats(&json),
    })
}

fn parse_formats(json: &Value) -> Vec<MediaFormat> {
    let Some(formats_array) = json["formats"].as_array() else {
        return Vec::new();
    };

    formats_array
        .iter()
        .filter_map(|f| {
            let format_id = f["format_id"].as_str().filter(|id| !id.is_empty())?;
            Some(MediaFormat {
                format_id: format_id.to_string(),
                ext: f["ext"].as_str().unwrap_or("").to_string(),
                resolution: f["resolution"].as_str().map(|s| s.to_string()),
                width: f["width"].as_u64().map(|w| w as u32),
                height: f["height"].as_u64().map(|h| h as u32),
                fps: f["fps"].as_f64().map(|fps| fps as f32),
                vcodec: f["vcodec"].as_str().map(|s| s.to_string()),
                acodec: f["acodec"].as_str().map(|s| s.to_string()),
                filesize: f["filesize"].as_u64(),
                filesize_approx: f["filesize_approx"].as_u64(),
                tbr: f["tbr"].as_f64().map(|t| t as f32),
                abr: f["abr"].as_f64().map(|a| a as f32),
                format_note: f["format_note"].as_str().map(|s| s.to_string()),
            })
        })
        .collect()
}

/// `20240115` -> `2024-01-15`
fn format_upload_date(raw: &str) -> Option<String> {
    let format = time::macros::format_description!("[year][month][day]");
    time::Date::parse(raw, format).ok().map(|d| d.to_string())
}

/// Catalogue entry as printed by the `info` command
#[derive(Debug, Clone, Serialize)]
pub struct FormatListing {
    pub format_id: String,
    pub format_note: Option<String>,
    pub ext: String,
    /// Quality label, e.g. `1920x1080 (1080p+)` or `audio only`
    pub resolution: String,
    pub filesize: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub fps: Option<f32>,
    pub tbr: Option<f32>,
    pub abr: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Metadata report printed by the `info` command
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub id: String,
    pub title: String,
    pub duration: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub upload_date: Option<String>,
    pub formats: Vec<FormatListing>,
}

impl InfoReport {
    pub fn from_info(info: &MediaInfo) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut formats: Vec<FormatListing> = info
            .formats
            .iter()
            .filter(|f| f.has_video() || f.has_audio())
            .filter(|f| {
                seen.insert((
                    f.format_id.clone(),
                    f.ext.clone(),
                    f.resolution.clone(),
                    f.vcodec.clone(),
                    f.acodec.clone(),
                ))
            })
            .map(|f| FormatListing {
                format_id: f.format_id.clone(),
                format_note: f.format_note.clone(),
                ext: f.ext.clone(),
                resolution: quality_label(f),
                filesize: f
                    .effective_size()
                    .or_else(|| estimate_size(f, info.duration_seconds)),
                vcodec: f.vcodec.clone(),
                acodec: f.acodec.clone(),
                fps: f.fps,
                tbr: f.tbr,
                abr: f.abr,
                width: f.width,
                height: f.height,
            })
            .collect();

        formats.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));

        Self {
            id: info.id.clone(),
            title: info.title.clone(),
            duration: info.duration_seconds,
            thumbnail: info.thumbnail.clone(),
            uploader: info.uploader.clone(),
            upload_date: info.upload_date.clone(),
            formats,
        }
    }
}

fn quality_label(f: &MediaFormat) -> String {
    match (f.width, f.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            let bucket = match h {
                1080.. => "1080p+",
                720.. => "720p",
                480.. => "480p",
                360.. => "360p",
                240.. => "240p",
                _ => "144p",
            };
            format!("{w}x{h} ({bucket})")
        }
        _ if f.is_audio_only() => "audio only".to_string(),
        _ => f
            .resolution
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Rough size from bitrate: kbps * duration / 8
fn estimate_size(f: &MediaFormat, duration_seconds: u64) -> Option<u64> {
    let tbr = f.tbr.filter(|t| *t > 0.0)?;
    let bytes = (tbr as f64 * 1000.0 * duration_seconds as f64 / 8.0) as u64;
    (bytes > 0).then_some(bytes)
}

// Video before audio; video by height then bitrate, audio by bitrate.
// Bitrates are compared in whole bits per second to keep the key `Ord`.
fn sort_key(f: &FormatListing) -> (u8, u32, u64) {
    let to_bps = |kbps: Option<f32>| (kbps.unwrap_or(0.0).max(0.0) as f64 * 1000.0) as u64;
    let is_audio =
        f.resolution == "audio only" || f.vcodec.as_deref().map_or(true, |v| v == "none");
    if is_audio {
        (0, 0, to_bps(f.abr.or(f.tbr)))
    } else {
        (1, f.height.unwrap_or(0), to_bps(f.tbr))
    }
}
