// Helper functions for driving engine subprocesses

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};

use super::errors::DownloadError;

/// Run command with timeout, collecting stdout and stderr in full
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    tracing::debug!(program, ?args, timeout_secs, "running command");

    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| {
            DownloadError::ExecutionError(format!("Failed to capture stdout from {program}"))
        })?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| {
            DownloadError::ExecutionError(format!("Failed to capture stderr from {program}"))
        })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = join_pipe(stdout_task, "stdout").await?;
            let stderr = join_pipe(stderr_task, "stderr").await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::ExecutionError(format!(
                "{program} timed out after {timeout_secs}s"
            )))
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("{name} task failed: {e}")))?
        .map_err(DownloadError::from)
}

/// Spawn failures: a missing binary is a tool problem, anything else is an I/O error
pub fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::ExecutionError(format!("Failed to start {program}: {e}"))
    }
}

/// Build proxy arguments for yt-dlp
pub fn proxy_args(proxy: Option<&str>) -> Vec<String> {
    match proxy {
        Some(p) if !p.trim().is_empty() => vec!["--proxy".to_string(), p.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Build timeout arguments for yt-dlp
pub fn timeout_args(socket_timeout: Option<u32>) -> Vec<String> {
    match socket_timeout {
        Some(t) => vec!["--socket-timeout".to_string(), t.to_string()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_args() {
        assert_eq!(
            proxy_args(Some("socks5h://127.0.0.1:1080")),
            vec!["--proxy", "socks5h://127.0.0.1:1080"]
        );
        assert!(proxy_args(Some("  ")).is_empty());
        assert!(proxy_args(None).is_empty());
        assert_eq!(timeout_args(Some(15)), vec!["--socket-timeout", "15"]);
        assert!(timeout_args(None).is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let err = run_output_with_timeout("definitely-not-a-real-binary-xyz", vec![], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams() {
        let out = run_output_with_timeout(
            "sh",
            vec!["-c".into(), "echo out; echo err 1>&2; exit 3".into()],
            5,
        )
        .await
        .unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&out.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_output_with_timeout("sleep", vec!["5".into()], 1).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
