//! The StoryReel job pipeline runtime.
//!
//! Accepts a prose submission, drives it through four stages
//! (analyze, storyboard, render, compose), and publishes progress
//! events until the final video is promoted:
//!
//! ```text
//! novel text -> TextAnalyzer -> AnalyzedText
//!            -> build_storyboard -> Storyboard
//!            -> SceneRenderer -> RenderedStoryboard
//!            -> SceneComposer -> FinalVideo
//! ```
//!
//! [`Engine::submit`] returns a job id synchronously; observers follow
//! the job over [`Engine::subscribe`]. Jobs are isolated: each owns a
//! scratch tree and a cancellation signal, sharing only the event bus.

pub mod analyzer;
pub mod composer;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod renderer;
pub mod retry;
pub mod storyboard;
pub mod telemetry;
pub mod voices;

pub use analyzer::{AnalysisOutcome, TextAnalyzer, MIN_TEXT_LENGTH};
pub use composer::SceneComposer;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use logging::JobLogger;
pub use orchestrator::Engine;
pub use renderer::SceneRenderer;
pub use retry::{retry_with_backoff, RetryClass, RetryError, RetryPolicy};
pub use storyboard::build_storyboard;
pub use telemetry::init_tracing;
pub use voices::VoiceRegistry;
