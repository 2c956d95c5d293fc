use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workspace::MediaKind;

use super::error::PipelineError;

/// Where a request is in its pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStage {
    Fetching,
    TrackSelecting,
    Acquiring(MediaKind),
    Merging,
    Done,
    Failed(String),
}

impl RequestStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStage::Done | RequestStage::Failed(_))
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStage::Fetching => f.write_str("fetching"),
            RequestStage::TrackSelecting => f.write_str("track-selecting"),
            RequestStage::Acquiring(kind) => write!(f, "acquiring-{kind}"),
            RequestStage::Merging => f.write_str("merging"),
            RequestStage::Done => f.write_str("done"),
            RequestStage::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub url: String,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRequest {
    pub url: String,
    pub stage: String,
    pub reason: String,
}

/// Outcome of a whole batch run. Failures are only ever appended.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub completed: Vec<CompletedRequest>,
    pub failed: Vec<FailedRequest>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for BatchResult {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl BatchResult {
    pub fn record_success(&mut self, url: &str, output: PathBuf) {
        self.completed.push(CompletedRequest {
            url: url.to_string(),
            output,
        });
    }

    pub fn record_failure(&mut self, url: &str, stage: &RequestStage, error: &PipelineError) {
        self.failed.push(FailedRequest {
            url: url.to_string(),
            stage: stage.to_string(),
            reason: error.to_string(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed.iter().map(|entry| entry.url.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        if self.is_success() {
            return format!(
                "Done. All {} requested videos have been downloaded.",
                self.completed.len()
            );
        }
        let mut lines = vec![format!(
            "Done. {} downloaded, {} not downloaded:",
            self.completed.len(),
            self.failed.len()
        )];
        for entry in &self.failed {
            lines.push(format!("  - {} ({}: {})", entry.url, entry.stage, entry.reason));
        }
        lines.join("\n")
    }
}
