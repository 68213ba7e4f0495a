//! Text analysis entities produced by stage 1.
//!
//! These types double as the wire schema for the text-understanding
//! adapter: unknown keys are ignored, missing optional keys default,
//! and missing required keys fail deserialization.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Character gender as extracted from the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

/// Coarse age bucket used for voice matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgeStage {
    Child,
    Youth,
    Adult,
    Elder,
    #[default]
    Unknown,
}

/// Visual description of a character.
///
/// All descriptive fields are optional; the analyzer fills what the
/// text supports and leaves the rest empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Appearance {
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default)]
    pub age_stage: AgeStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clothing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<String>,
}

impl Appearance {
    /// Overlay `other` on top of `self`: non-empty fields of `other` win.
    pub fn overlaid_with(&self, other: &Appearance) -> Appearance {
        fn pick(base: &Option<String>, over: &Option<String>) -> Option<String> {
            match over {
                Some(s) if !s.is_empty() => Some(s.clone()),
                _ => base.clone(),
            }
        }
        Appearance {
            gender: if other.gender != Gender::Unknown {
                other.gender
            } else {
                self.gender
            },
            age: other.age.or(self.age),
            age_stage: if other.age_stage != AgeStage::Unknown {
                other.age_stage
            } else {
                self.age_stage
            },
            hair: pick(&self.hair, &other.hair),
            eyes: pick(&self.eyes, &other.eyes),
            clothing: pick(&self.clothing, &other.clothing),
            features: pick(&self.features, &other.features),
            body_type: pick(&self.body_type, &other.body_type),
            height: pick(&self.height, &other.height),
            skin: pick(&self.skin, &other.skin),
        }
    }

    /// Short prompt fragment describing this appearance.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match self.gender {
            Gender::Male => parts.push("male".to_string()),
            Gender::Female => parts.push("female".to_string()),
            Gender::Unknown => {}
        }
        match self.age_stage {
            AgeStage::Unknown => {}
            stage => parts.push(format!("{:?}", stage).to_lowercase()),
        }
        for (label, field) in [
            ("hair", &self.hair),
            ("eyes", &self.eyes),
            ("wearing", &self.clothing),
            ("", &self.features),
            ("", &self.body_type),
            ("", &self.height),
            ("skin", &self.skin),
        ] {
            if let Some(v) = field {
                if !v.is_empty() {
                    if label.is_empty() {
                        parts.push(v.clone());
                    } else {
                        parts.push(format!("{} {}", label, v));
                    }
                }
            }
        }
        parts.join(", ")
    }
}

/// Appearance of a character at a specific age stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgeVariant {
    pub age_stage: AgeStage,
    #[serde(default)]
    pub appearance: Appearance,
}

/// A character extracted from the text, unique by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age_variants: Vec<AgeVariant>,
}

impl Character {
    /// A character known only by name.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            appearance: Appearance::default(),
            personality: String::new(),
            role: String::new(),
            age_variants: Vec::new(),
        }
    }
}

/// One spoken line within a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
}

/// A single scene within a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    /// Unique within the chapter, assigned in encounter order
    #[serde(default)]
    pub scene_id: u32,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub atmosphere: String,
    #[serde(default)]
    pub lighting: String,
    /// Names of characters present, in order
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub actions: Vec<String>,
    /// Scene-local appearance overrides by character name
    #[serde(default)]
    pub character_appearances: BTreeMap<String, Appearance>,
}

/// A chapter: an ordered run of scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Chapter {
    pub chapter_id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

/// Narrative weight of a plot point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    Conflict,
    Climax,
    Resolution,
    #[default]
    Normal,
}

/// A plot point referencing a scene by global 1-based index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlotPoint {
    pub scene_ref: u32,
    #[serde(default)]
    pub kind: PlotKind,
    #[serde(default)]
    pub description: String,
}

/// Output of stage 1: the full entity graph of the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzedText {
    pub characters: Vec<Character>,
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub plot_points: Vec<PlotPoint>,
}

impl AnalyzedText {
    /// Total scene count across chapters.
    pub fn scene_count(&self) -> usize {
        self.chapters.iter().map(|c| c.scenes.len()).sum()
    }

    /// Look up a character by name.
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// True if `name` is a known character.
    pub fn has_character(&self, name: &str) -> bool {
        self.character(name).is_some()
    }
}
