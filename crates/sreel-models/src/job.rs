//! Job definitions for pipeline processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::event::ErrorKind;
use crate::options::JobOptions;
use crate::render::FinalVideo;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job accepted, not yet picked up
    #[default]
    Pending,
    /// Job is being driven through the pipeline
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
    /// Job was cancelled cooperatively
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepted, nothing started yet
    #[default]
    Init,
    /// Stage 1: text understanding
    Analyze,
    /// Stage 2: storyboard construction
    Storyboard,
    /// Stage 3: per-scene asset rendering
    Render,
    /// Stage 4: clip muxing and concatenation
    Compose,
    /// Pipeline finished
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Analyze => "analyze",
            Stage::Storyboard => "storyboard",
            Stage::Render => "render",
            Stage::Compose => "compose",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal error recorded on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// A text-to-video job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// The original prose
    pub input_text: String,

    /// Submission options
    pub options: JobOptions,

    /// Lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Current pipeline stage
    #[serde(default)]
    pub stage: Stage,

    /// Progress (0-100), never decreases
    #[serde(default)]
    pub progress: u8,

    /// Short human-readable status
    #[serde(default)]
    pub message: String,

    /// Final video, populated only on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FinalVideo>,

    /// Terminal error, populated only on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(input_text: impl Into<String>, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            input_text: input_text.into(),
            options,
            state: JobState::Pending,
            stage: Stage::Init,
            progress: 0,
            message: "queued".to_string(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to running.
    pub fn start(&mut self) {
        self.state = JobState::Running;
        self.message = "processing".to_string();
        self.updated_at = Utc::now();
    }

    /// Update the stage, message, and progress in one step.
    ///
    /// Progress is clamped so it never moves backwards.
    pub fn advance(&mut self, stage: Stage, progress: u8, message: impl Into<String>) {
        self.stage = stage;
        self.progress = self.progress.max(progress.min(100));
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Mark the job completed with its final video.
    pub fn complete(&mut self, result: FinalVideo) {
        self.state = JobState::Completed;
        self.stage = Stage::Done;
        self.progress = 100;
        self.message = "completed".to_string();
        self.result = Some(result);
        self.updated_at = Utc::now();
    }

    /// Mark the job failed.
    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        let detail = detail.into();
        self.state = JobState::Failed;
        self.message = format!("failed: {}", kind.as_str());
        self.error = Some(JobError { kind, detail });
        self.updated_at = Utc::now();
    }

    /// Mark the job cancelled.
    pub fn cancel(&mut self) {
        self.state = JobState::Cancelled;
        self.message = "cancelled".to_string();
        self.error = Some(JobError {
            kind: ErrorKind::Cancelled,
            detail: "job cancelled".to_string(),
        });
        self.updated_at = Utc::now();
    }

    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_creation() {
        let job = Job::new("Once upon a time...", JobOptions::default());
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.stage, Stage::Init);
        assert_eq!(job.progress, 0);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = Job::new("text", JobOptions::default());

        job.start();
        assert_eq!(job.state, JobState::Running);

        job.advance(Stage::Analyze, 20, "analysis complete");
        assert_eq!(job.stage, Stage::Analyze);
        assert_eq!(job.progress, 20);

        job.complete(FinalVideo {
            path: "/videos/x/final.mp4".into(),
            duration_seconds: 12.0,
            byte_size: 1024,
            scene_count: 3,
            chapter_count: 1,
        });
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.is_terminal());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = Job::new("text", JobOptions::default());
        job.advance(Stage::Render, 50, "rendering");
        job.advance(Stage::Render, 40, "rendering");
        assert_eq!(job.progress, 50);
        job.advance(Stage::Render, 200, "rendering");
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_job_failure_records_error() {
        let mut job = Job::new("text", JobOptions::default());
        job.start();
        job.fail(ErrorKind::ModelOutput, "missing characters key");

        assert_eq!(job.state, JobState::Failed);
        let err = job.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::ModelOutput);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_cancel_is_terminal_but_distinct() {
        let mut job = Job::new("text", JobOptions::default());
        job.start();
        job.cancel();
        assert_eq!(job.state, JobState::Cancelled);
        assert_ne!(job.state, JobState::Failed);
        assert!(job.is_terminal());
    }
}
