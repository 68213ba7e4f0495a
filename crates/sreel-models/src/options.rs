//! Per-job submission options.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::voice::VoiceSpec;

/// Stage-1 analysis strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerMode {
    /// One adapter call over the whole text
    Simple,
    /// Windowed analysis with a merge step
    #[default]
    Chunked,
}

/// Per-scene audio granularity for dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    /// One audio unit per dialogue line
    PerLine,
    /// All lines of a scene merged into one unit
    #[default]
    Merged,
}

/// Options accepted with a job submission.
///
/// Every field has a serde default so clients can submit `{}` and get
/// sensible behavior. `validate()` must pass before a job is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobOptions {
    /// Stage-1 strategy
    #[serde(default)]
    pub analyzer_mode: AnalyzerMode,

    /// Cap on extracted characters
    #[serde(default = "default_max_characters")]
    pub max_characters: u32,

    /// Cap on extracted scenes
    #[serde(default = "default_max_scenes")]
    pub max_scenes: u32,

    /// Characters per window in chunked mode
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-scene audio granularity
    #[serde(default)]
    pub dialogue_mode: DialogueMode,

    /// Separator inserted between merged dialogue lines
    #[serde(default = "default_dialogue_pause")]
    pub dialogue_pause: String,

    /// Lower clamp for per-scene duration (seconds)
    #[serde(default = "default_duration_min")]
    pub duration_min: f64,

    /// Upper clamp for per-scene duration (seconds)
    #[serde(default = "default_duration_max")]
    pub duration_max: f64,

    /// Speech pacing used for duration estimates
    #[serde(default = "default_chars_per_second")]
    pub chars_per_second: f64,

    /// Extra seconds per listed scene action
    #[serde(default = "default_action_seconds")]
    pub action_seconds: f64,

    /// Duration of scenes with neither dialogue nor narration (seconds)
    #[serde(default = "default_silent_scene_duration")]
    pub silent_scene_duration: f64,

    /// Image size passed to the image adapter, `WxH`
    #[serde(default = "default_image_size")]
    pub image_size: String,

    /// Optional seed forwarded to the image adapter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_seed: Option<u64>,

    /// Retries per external op on top of the initial attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Per external operation timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Stage-3 fan-out bound
    #[serde(default = "default_max_parallel_scenes")]
    pub max_parallel_scenes: usize,

    /// Skip scratch cleanup when the job fails
    #[serde(default)]
    pub retain_scratch_on_failure: bool,

    /// Voice used for narration units
    #[serde(default = "default_narrator_voice")]
    pub narrator_voice: String,

    /// Voice used when no catalog entry matches a character
    #[serde(default = "default_default_voice")]
    pub default_voice: String,

    /// Override for the builtin voice catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_catalog: Option<Vec<VoiceSpec>>,

    /// Optional whole-job timeout (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
}

fn default_max_characters() -> u32 {
    10
}

fn default_max_scenes() -> u32 {
    30
}

fn default_chunk_size() -> usize {
    3000
}

fn default_dialogue_pause() -> String {
    " ... ".to_string()
}

fn default_duration_min() -> f64 {
    3.0
}

fn default_duration_max() -> f64 {
    10.0
}

fn default_chars_per_second() -> f64 {
    3.0
}

fn default_action_seconds() -> f64 {
    1.5
}

fn default_silent_scene_duration() -> f64 {
    3.0
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_parallel_scenes() -> usize {
    1
}

fn default_narrator_voice() -> String {
    "f_adult_02".to_string()
}

fn default_default_voice() -> String {
    "m_adult_01".to_string()
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            analyzer_mode: AnalyzerMode::default(),
            max_characters: default_max_characters(),
            max_scenes: default_max_scenes(),
            chunk_size: default_chunk_size(),
            dialogue_mode: DialogueMode::default(),
            dialogue_pause: default_dialogue_pause(),
            duration_min: default_duration_min(),
            duration_max: default_duration_max(),
            chars_per_second: default_chars_per_second(),
            action_seconds: default_action_seconds(),
            silent_scene_duration: default_silent_scene_duration(),
            image_size: default_image_size(),
            image_seed: None,
            retry_attempts: default_retry_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            max_parallel_scenes: default_max_parallel_scenes(),
            retain_scratch_on_failure: false,
            narrator_voice: default_narrator_voice(),
            default_voice: default_default_voice(),
            voice_catalog: None,
            job_timeout_secs: None,
        }
    }
}

impl JobOptions {
    /// Validate the options.
    pub fn check(&self) -> Result<(), String> {
        if self.max_characters == 0 || self.max_characters > 100 {
            return Err(format!(
                "max_characters must be in 1..=100, got {}",
                self.max_characters
            ));
        }
        if self.max_scenes == 0 || self.max_scenes > 500 {
            return Err(format!(
                "max_scenes must be in 1..=500, got {}",
                self.max_scenes
            ));
        }
        if !(200..=100_000).contains(&self.chunk_size) {
            return Err(format!(
                "chunk_size must be in 200..=100000, got {}",
                self.chunk_size
            ));
        }
        if self.duration_min < 0.5 || !self.duration_min.is_finite() {
            return Err(format!("duration_min out of range: {}", self.duration_min));
        }
        if self.duration_max > 600.0 || !self.duration_max.is_finite() {
            return Err(format!("duration_max out of range: {}", self.duration_max));
        }
        if self.duration_min > self.duration_max {
            return Err(format!(
                "duration_min ({}) exceeds duration_max ({})",
                self.duration_min, self.duration_max
            ));
        }
        if self.chars_per_second <= 0.0 || !self.chars_per_second.is_finite() {
            return Err(format!(
                "chars_per_second must be positive, got {}",
                self.chars_per_second
            ));
        }
        if self.action_seconds < 0.0 || !self.action_seconds.is_finite() {
            return Err(format!(
                "action_seconds must be non-negative, got {}",
                self.action_seconds
            ));
        }
        if self.silent_scene_duration < 0.5 || self.silent_scene_duration > 60.0 {
            return Err(format!(
                "silent_scene_duration out of range: {}",
                self.silent_scene_duration
            ));
        }
        check_image_size(&self.image_size)?;
        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(format!(
                "retry_attempts must be in 1..=10, got {}",
                self.retry_attempts
            ));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 3600 {
            return Err(format!(
                "request_timeout_secs must be in 1..=3600, got {}",
                self.request_timeout_secs
            ));
        }
        if self.max_parallel_scenes == 0 || self.max_parallel_scenes > 32 {
            return Err(format!(
                "max_parallel_scenes must be in 1..=32, got {}",
                self.max_parallel_scenes
            ));
        }
        if self.narrator_voice.is_empty() {
            return Err("narrator_voice must not be empty".to_string());
        }
        if self.default_voice.is_empty() {
            return Err("default_voice must not be empty".to_string());
        }
        if let Some(catalog) = &self.voice_catalog {
            if catalog.is_empty() {
                return Err("voice_catalog override must not be empty".to_string());
            }
        }
        Ok(())
    }
}

fn check_image_size(value: &str) -> Result<(), String> {
    let invalid = || format!("image_size must look like 1024x1024, got {:?}", value);
    let (w, h) = value.split_once('x').ok_or_else(invalid)?;
    let w: u32 = w.parse().map_err(|_| invalid())?;
    let h: u32 = h.parse().map_err(|_| invalid())?;
    if !(64..=8192).contains(&w) || !(64..=8192).contains(&h) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = JobOptions::default();
        assert_eq!(opts.analyzer_mode, AnalyzerMode::Chunked);
        assert_eq!(opts.dialogue_mode, DialogueMode::Merged);
        assert_eq!(opts.max_characters, 10);
        assert_eq!(opts.max_scenes, 30);
        assert_eq!(opts.chunk_size, 3000);
        assert_eq!(opts.retry_attempts, 3);
        assert_eq!(opts.max_parallel_scenes, 1);
        assert!(!opts.retain_scratch_on_failure);
        assert!(opts.check().is_ok());
    }

    #[test]
    fn test_empty_json_deserializes_to_defaults() {
        let opts: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.image_size, "1024x1024");
        assert!((opts.duration_min - 3.0).abs() < f64::EPSILON);
        assert!(opts.image_seed.is_none());
        assert!(opts.voice_catalog.is_none());
    }

    #[test]
    fn test_invalid_image_size_rejected() {
        let mut opts = JobOptions::default();
        opts.image_size = "huge".to_string();
        assert!(opts.check().is_err());

        opts.image_size = "1024x".to_string();
        assert!(opts.check().is_err());

        opts.image_size = "512x768".to_string();
        assert!(opts.check().is_ok());
    }

    #[test]
    fn test_inverted_duration_clamp_rejected() {
        let mut opts = JobOptions::default();
        opts.duration_min = 20.0;
        opts.duration_max = 10.0;
        assert!(opts.check().is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut opts = JobOptions::default();
        opts.retry_attempts = 0;
        assert!(opts.check().is_err());

        let mut opts = JobOptions::default();
        opts.max_parallel_scenes = 64;
        assert!(opts.check().is_err());

        let mut opts = JobOptions::default();
        opts.chars_per_second = 0.0;
        assert!(opts.check().is_err());
    }
}
