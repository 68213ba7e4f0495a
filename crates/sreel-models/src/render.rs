//! Rendered artifacts produced by stages 3 and 4.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::storyboard::Storyboard;

/// Addresses a scene within a storyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SceneRef {
    pub chapter_id: u32,
    pub scene_id: u32,
}

impl std::fmt::Display for SceneRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chapter {} scene {}", self.chapter_id, self.scene_id)
    }
}

/// Per-scene output of stage 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderedScene {
    pub scene_ref: SceneRef,
    /// Still image inside the job scratch tree
    pub image_path: PathBuf,
    /// Audio tracks in playback order; empty for silence scenes
    pub audio_paths: Vec<PathBuf>,
    /// Probed duration of the audio tracks, seconds
    pub measured_audio_duration: f64,
    /// max(estimated, measured)
    pub final_duration: f64,
}

/// Output of stage 3: the storyboard plus its rendered scenes, in
/// storyboard order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderedStoryboard {
    pub storyboard: Storyboard,
    pub scenes: Vec<RenderedScene>,
}

/// Output of stage 4: the promoted final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalVideo {
    #[serde(rename = "video_path")]
    pub path: PathBuf,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    #[serde(rename = "file_size")]
    pub byte_size: u64,
    #[serde(rename = "scenes_count")]
    pub scene_count: u32,
    #[serde(rename = "chapters_count")]
    pub chapter_count: u32,
}
