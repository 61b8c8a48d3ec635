// Error types for the download pipeline

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// yt-dlp or python not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL rejected by the engine; message is the engine's own
    #[error("{0}")]
    InvalidUrl(String),

    /// Request rejected before anything ran
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command could not be spawned or waited on
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Metadata extraction produced nothing usable
    #[error("Could not extract video information: {0}")]
    Unresolvable(String),

    /// The engine ran and reported a failure; message is passed through as-is
    #[error("{0}")]
    Engine(String),

    /// Filesystem failure outside the engine
    #[error("I/O error: {0}")]
    Io(String),

    #[error("download cancelled")]
    Cancelled,
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// Classify raw engine stderr. A missing binary never gets here: spawn
// failures are mapped by `utils::spawn_error`.
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let message = engine_message(s.trim());

        if message.contains("Unsupported URL") || message.contains("is not a valid URL") {
            return Self::InvalidUrl(message);
        }

        Self::Engine(message)
    }
}

/// Pick the most relevant line from engine stderr.
///
/// yt-dlp prints warnings and debug chatter before the actual `ERROR:` line;
/// when one is present it becomes the message, otherwise the whole text is kept.
fn engine_message(stderr: &str) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .collect();

    if errors.is_empty() {
        if stderr.is_empty() {
            "engine exited without an error message".to_string()
        } else {
            stderr.to_string()
        }
    } else {
        errors.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_keeps_error_lines_only() {
        let stderr = concat!(
            "WARNING: something odd\n",
            "ERROR: [youtube] abc: Requested format is not available\n",
        );
        let err = DownloadError::from(stderr.to_string());
        assert_eq!(
            err.to_string(),
            "ERROR: [youtube] abc: Requested format is not available"
        );
    }

    #[test]
    fn unsupported_url_is_classified_without_rewording() {
        let stderr =
            "WARNING: [generic] Falling back\nERROR: Unsupported URL: https://example.com\n";
        let err = DownloadError::from(stderr.to_string());
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert_eq!(err.to_string(), "ERROR: Unsupported URL: https://example.com");
    }

    #[test]
    fn missing_file_during_postprocessing_is_an_engine_error() {
        let stderr = concat!(
            "WARNING: foo\n",
            "ERROR: Postprocessing: [Errno 2] No such file or directory: '/tmp/1_x.temp.mp4'\n",
        );
        let err = DownloadError::from(stderr.to_string());
        assert!(matches!(err, DownloadError::Engine(_)));
        assert_eq!(
            err.to_string(),
            "ERROR: Postprocessing: [Errno 2] No such file or directory: '/tmp/1_x.temp.mp4'"
        );
    }

    #[test]
    fn empty_stderr_still_has_message() {
        let err = DownloadError::from(String::new());
        assert_eq!(err.to_string(), "engine exited without an error message");
    }
}
