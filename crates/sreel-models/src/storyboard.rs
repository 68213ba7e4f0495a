//! Storyboard entities produced by stage 2.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::{Appearance, Character, PlotPoint};

/// Visual plan for one scene's image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageInfo {
    pub prompt: String,
    #[serde(default)]
    pub style_tags: Vec<String>,
    #[serde(default = "default_shot_type")]
    pub shot_type: String,
    #[serde(default = "default_camera_angle")]
    pub camera_angle: String,
    #[serde(default)]
    pub camera_movement: String,
    #[serde(default)]
    pub composition: String,
    #[serde(default)]
    pub lighting: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default = "default_transition")]
    pub transition: String,
}

fn default_shot_type() -> String {
    "medium_shot".to_string()
}

fn default_camera_angle() -> String {
    "eye_level".to_string()
}

fn default_transition() -> String {
    "cut".to_string()
}

/// What a scene's audio unit contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    Narration,
    Dialogue,
    Silence,
}

/// One synthesizable audio unit within a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioInfo {
    pub kind: AudioKind,
    /// Set only for dialogue units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Estimated duration in seconds
    pub estimated_duration: f64,
}

impl AudioInfo {
    pub fn is_silence(&self) -> bool {
        self.kind == AudioKind::Silence
    }
}

/// A scene with its rendering plan attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryboardScene {
    /// Scene id inherited from the analysis, unique within the chapter
    pub scene_id: u32,
    pub image_info: ImageInfo,
    /// One or more audio units, in playback order
    pub audio_info: Vec<AudioInfo>,
    /// Global + per-scene appearance snapshot per present character
    #[serde(default)]
    pub characters_resolved: BTreeMap<String, Appearance>,
    /// Sum of the units' estimates, per-unit clamped
    pub estimated_duration: f64,
}

/// A chapter of storyboard scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryboardChapter {
    pub chapter_id: u32,
    #[serde(default)]
    pub title: String,
    pub scenes: Vec<StoryboardScene>,
}

/// Output of stage 2: the analysis tree with per-scene render plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Storyboard {
    pub characters: Vec<Character>,
    pub chapters: Vec<StoryboardChapter>,
    #[serde(default)]
    pub plot_points: Vec<PlotPoint>,
}

impl Storyboard {
    /// Total scene count across chapters.
    pub fn scene_count(&self) -> usize {
        self.chapters.iter().map(|c| c.scenes.len()).sum()
    }

    /// Sum of per-scene estimated durations.
    pub fn total_estimated_duration(&self) -> f64 {
        self.chapters
            .iter()
            .flat_map(|c| c.scenes.iter())
            .map(|s| s.estimated_duration)
            .sum()
    }

    /// Look up a character by name.
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }
}
