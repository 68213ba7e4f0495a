//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use sreel_models::{JobId, Stage};

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: Stage,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: Stage) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
        }
    }

    /// Logger for the same job in a different stage.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            job_id: self.job_id.clone(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, stage = %self.stage, "stage started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, stage = %self.stage, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, stage = %self.stage, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, stage = %self.stage, "{}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, stage = %self.stage, "stage completed: {}", message);
    }

    /// Create a tracing span carrying the job context.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, stage = %self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_stage_keeps_job_id() {
        let id = JobId::from_string("job-x");
        let logger = JobLogger::new(&id, Stage::Analyze);
        let render = logger.for_stage(Stage::Render);
        assert_eq!(render.job_id, "job-x");
        assert_eq!(render.stage, Stage::Render);
    }
}
