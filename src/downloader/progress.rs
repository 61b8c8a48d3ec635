// Progress reporter - normalizes engine status records
//
// yt-dlp hands its progress hooks a loosely typed dict; percentages arrive
// as display strings (" 40.0%", sometimes wrapped in ANSI colour codes).
// Anything that cannot be parsed is dropped for that one event.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use regex::Regex;
use serde_json::Value;

use super::models::{AttemptState, ProgressEvent};
use super::traits::{ProgressHook, ProgressSink};

lazy_static::lazy_static! {
    static ref ANSI_RE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
}

/// Bridges engine callbacks into [`AttemptState`] and a [`ProgressSink`]
pub struct ProgressReporter<'a> {
    state: &'a mut AttemptState,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(state: &'a mut AttemptState, sink: &'a dyn ProgressSink) -> Self {
        Self { state, sink }
    }

    fn on_downloading(&mut self, status: &Value) {
        self.state.download_started = true;

        let Some(percent) = parse_percent(status) else {
            return;
        };

        let eta = status["eta"]
            .as_i64()
            .or_else(|| status["eta"].as_f64().map(|v| v as i64));
        let speed = status["speed"].as_f64();

        self.sink.emit(&ProgressEvent::downloading(percent, eta, speed));
    }

    fn on_finished(&mut self, status: &Value) {
        let Some(filename) = status["filename"].as_str().filter(|f| !f.is_empty()) else {
            tracing::debug!("finished status without filename");
            return;
        };

        tracing::info!(filename, "engine finished writing");
        self.state.final_file_path = Some(PathBuf::from(filename));
        self.sink.emit(&ProgressEvent::finished(filename));
    }
}

impl ProgressHook for ProgressReporter<'_> {
    fn on_status(&mut self, status: &Value) {
        match status["status"].as_str() {
            Some("downloading") => self.on_downloading(status),
            Some("finished") => self.on_finished(status),
            _ => {}
        }
    }
}

/// Percentage from `_percent_str`, or from byte counters when the string is absent
fn parse_percent(status: &Value) -> Option<f64> {
    let percent = match status.get("_percent_str") {
        Some(Value::String(raw)) => {
            let clean = ANSI_RE.replace_all(raw, "");
            clean.trim().trim_end_matches('%').trim().parse::<f64>().ok()?
        }
        Some(Value::Number(n)) => n.as_f64()?,
        Some(_) => return None,
        None => {
            let done = status["downloaded_bytes"].as_f64()?;
            let total = status["total_bytes"]
                .as_f64()
                .or_else(|| status["total_bytes_estimate"].as_f64())
                .filter(|t| *t > 0.0)?;
            done / total * 100.0
        }
    };

    percent.is_finite().then(|| percent.clamp(0.0, 100.0))
}

/// Writes each event as one JSON line, flushed immediately
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> ProgressSink for JsonLinesSink<W> {
    fn emit(&self, event: &ProgressEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::ProgressPhase;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn collect(statuses: &[Value]) -> (AttemptState, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let mut state = AttemptState::new();
        {
            let mut reporter = ProgressReporter::new(&mut state, &tx);
            for s in statuses {
                reporter.on_status(s);
            }
        }
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        (state, events)
    }

    #[test]
    fn downloading_marks_started_and_emits() {
        let (state, events) = collect(&[json!({
            "status": "downloading",
            "_percent_str": " 40.0%",
            "eta": 12,
            "speed": 1048576.0
        })]);

        assert!(state.download_started);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, ProgressPhase::Downloading);
        assert_eq!(events[0].percent, Some(40.0));
        assert_eq!(events[0].eta_seconds, Some(12));
        assert_eq!(events[0].speed_bytes_per_sec, Some(1048576.0));
    }

    #[test]
    fn ansi_coloured_percent_is_parsed() {
        let (_, events) = collect(&[json!({
            "status": "downloading",
            "_percent_str": "\u{1b}[0;94m 12.5%\u{1b}[0m"
        })]);
        assert_eq!(events[0].percent, Some(12.5));
    }

    #[test]
    fn malformed_percent_drops_only_that_event() {
        let (state, events) = collect(&[
            json!({"status": "downloading", "_percent_str": "N/A"}),
            json!({"status": "downloading", "_percent_str": ["bad"]}),
            json!({"status": "downloading", "_percent_str": " 55.0%"}),
        ]);

        assert!(state.download_started);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent, Some(55.0));
    }

    #[test]
    fn byte_counters_fill_in_missing_percent() {
        let (_, events) = collect(&[
            json!({"status": "downloading", "downloaded_bytes": 25, "total_bytes_estimate": 100}),
            json!({"status": "downloading", "downloaded_bytes": 25}),
        ]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent, Some(25.0));
    }

    #[test]
    fn finished_records_filename() {
        let (state, events) = collect(&[json!({
            "status": "finished",
            "filename": "/tmp/downloads/1_video.m4a"
        })]);

        assert!(!state.download_started);
        assert_eq!(
            state.final_file_path(),
            Some(std::path::Path::new("/tmp/downloads/1_video.m4a"))
        );
        assert_eq!(events[0].phase, ProgressPhase::Finished);
    }

    #[test]
    fn unknown_status_is_ignored() {
        let (state, events) = collect(&[json!({"status": "error"}), json!("garbage"), json!(null)]);
        assert_eq!(state, AttemptState::new());
        assert!(events.is_empty());
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(&ProgressEvent::downloading(1.0, None, None));
        sink.emit(&ProgressEvent::finished("a.mp4"));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["type"], "finished");
        assert_eq!(last["filename"], "a.mp4");
    }
}
