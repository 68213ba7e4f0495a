//! Engine error types.

use thiserror::Error;

use sreel_models::{ErrorKind, SceneRef};
use sreel_scratch::StorageError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Pipeline failure, mapped onto the closed external error taxonomy
/// via [`EngineError::kind`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("model output invalid: {0}")]
    ModelOutput(String),

    #[error("external service failed: {0}")]
    ExternalService(String),

    #[error("render failed at {scene}: {detail}")]
    Render { scene: SceneRef, detail: String },

    #[error("composition failed: {0}")]
    Composition(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn model_output(msg: impl Into<String>) -> Self {
        Self::ModelOutput(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    pub fn render(scene: SceneRef, detail: impl Into<String>) -> Self {
        Self::Render {
            scene,
            detail: detail.into(),
        }
    }

    /// The externally visible error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::ModelOutput(_) => ErrorKind::ModelOutput,
            EngineError::ExternalService(_) => ErrorKind::ExternalService,
            EngineError::Render { .. } => ErrorKind::Render,
            EngineError::Composition(_) => ErrorKind::Composition,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Prefix adapter-level details with the scene they happened in,
    /// without changing the error kind.
    pub fn in_scene(self, scene: SceneRef) -> Self {
        match self {
            EngineError::ModelOutput(d) => EngineError::ModelOutput(format!("{}: {}", scene, d)),
            EngineError::ExternalService(d) => {
                EngineError::ExternalService(format!("{}: {}", scene, d))
            }
            other => other,
        }
    }
}
