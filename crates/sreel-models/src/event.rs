//! Progress event schemas delivered to subscribers.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, Stage};
use crate::render::FinalVideo;

/// Closed set of externally visible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorKind {
    /// Bad input or out-of-range option
    #[serde(rename = "ValidationError")]
    Validation,
    /// Adapter returned malformed data
    #[serde(rename = "ModelOutputError")]
    ModelOutput,
    /// Transport failure after exhausted retries
    #[serde(rename = "ExternalServiceError")]
    ExternalService,
    /// Stage-3 failure
    #[serde(rename = "RenderError")]
    Render,
    /// Stage-4 failure
    #[serde(rename = "CompositionError")]
    Composition,
    /// Filesystem failure
    #[serde(rename = "StorageError")]
    Storage,
    /// Cooperative cancellation
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::ModelOutput => "ModelOutputError",
            ErrorKind::ExternalService => "ExternalServiceError",
            ErrorKind::Render => "RenderError",
            ErrorKind::Composition => "CompositionError",
            ErrorKind::Storage => "StorageError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status message on a job's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Stage/percent update
    Progress {
        stage: Stage,
        progress: u8,
        message: String,
    },

    /// Terminal success
    Completed { result: FinalVideo },

    /// Terminal failure (including cancellation)
    Failed { kind: ErrorKind, detail: String },
}

impl JobEvent {
    /// Create a progress event, clamping to 0..=100.
    pub fn progress(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        JobEvent::Progress {
            stage,
            progress: progress.min(100),
            message: message.into(),
        }
    }

    /// Create a completion event.
    pub fn completed(result: FinalVideo) -> Self {
        JobEvent::Completed { result }
    }

    /// Create a failure event.
    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        JobEvent::Failed {
            kind,
            detail: detail.into(),
        }
    }

    /// Terminal events end a subscription.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }

    /// Progress value carried by this event, if any.
    pub fn progress_value(&self) -> Option<u8> {
        match self {
            JobEvent::Progress { progress, .. } => Some(*progress),
            JobEvent::Completed { .. } => Some(100),
            JobEvent::Failed { .. } => None,
        }
    }
}

/// An event with its per-job ordering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventEnvelope {
    pub job_id: JobId,
    /// Strictly monotonic per job
    pub seq: u64,
    /// Milliseconds since epoch
    #[serde(default = "default_timestamp")]
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: JobEvent,
}

fn default_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

impl EventEnvelope {
    /// Wrap an event with current timestamp; `seq` is assigned by the bus.
    pub fn new(job_id: JobId, event: JobEvent) -> Self {
        Self {
            job_id,
            seq: 0,
            timestamp_ms: Utc::now().timestamp_millis(),
            event,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}
