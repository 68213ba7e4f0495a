//! Generative model adapters for the StoryReel pipeline.
//!
//! Three capability traits hide the provider protocols:
//! - [`TextModel`]: prose in, entity-graph JSON out
//! - [`ImageModel`]: prompt in, raw image bytes out
//! - [`SpeechModel`]: text + voice in, raw audio bytes out
//!
//! Adapters are stateless and safe for concurrent use. Transport
//! failures are retryable; malformed responses are fatal (see
//! [`AiError::is_retryable`]).

pub mod error;
pub mod image;
pub mod speech;
pub mod text;

pub use error::{AiError, AiResult};
pub use image::{HttpImageModel, ImageModel, ImageModelConfig};
pub use speech::{AudioEncoding, HttpSpeechModel, SpeechModel, SpeechModelConfig};
pub use text::{GeminiTextModel, TextModel, TextModelConfig};
