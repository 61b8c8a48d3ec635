pub mod cli;
pub mod downloader;
pub mod ytdlp;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, DownloadArgs, InfoArgs};
use downloader::progress::JsonLinesSink;
use downloader::{DownloadError, DownloadOutcome, Downloader, ExtractionEngine};
use ytdlp::{InfoReport, YtDlpEngine};

/// Binary entry point: logs and progress go to stderr, the outcome JSON to stdout.
pub fn run() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    run_cli(Cli::parse())
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> ExitCode {
    tracing::debug!(?cli, "parsed arguments");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(DownloadError::from(e)),
    };

    let engine: Arc<dyn ExtractionEngine> = Arc::new(YtDlpEngine::new(cli.engine.to_config()));
    runtime.block_on(async move {
        match cli.command {
            Commands::Download(args) => download(engine, args).await,
            Commands::Info(args) => info(&*engine, args).await,
        }
    })
}

async fn download(engine: Arc<dyn ExtractionEngine>, args: DownloadArgs) -> ExitCode {
    let serve_base = args.serve_base.clone();
    let request = match args.into_request() {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    if let Err(e) = tokio::fs::create_dir_all(&request.output.dir).await {
        return fail(e.into());
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling download");
            token.cancel();
        }
    });

    let sink = JsonLinesSink::stderr();
    let downloader = Downloader::new(engine).with_serve_base(serve_base);

    match downloader.run(&request, &sink, &cancel).await {
        Ok(outcome) => {
            print_json(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

async fn info(engine: &dyn ExtractionEngine, args: InfoArgs) -> ExitCode {
    let url = args.url.trim();
    if url.is_empty() {
        return fail(DownloadError::InvalidRequest("URL is required".to_string()));
    }

    match engine.extract_metadata(url).await {
        Ok(info) => {
            tracing::info!(
                title = %info.title,
                formats = info.formats.len(),
                "video information extracted"
            );
            print_json(&InfoReport::from_info(&info));
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn fail(e: DownloadError) -> ExitCode {
    tracing::error!("{e}");
    print_json(&DownloadOutcome::failure(e.to_string()));
    ExitCode::FAILURE
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!("failed to serialize output: {e}"),
    }
}
