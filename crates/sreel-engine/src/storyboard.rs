//! Stage 2: storyboard construction.
//!
//! A pure transform from the analysis to per-scene render plans.
//! Deterministic: the same analysis and options always produce the
//! same storyboard.

use std::collections::BTreeMap;

use sreel_models::{
    AnalyzedText, Appearance, AudioInfo, AudioKind, DialogueMode, ImageInfo, JobOptions, Scene,
    Storyboard, StoryboardChapter, StoryboardScene,
};

const DEFAULT_SHOT_TYPE: &str = "medium_shot";
const DEFAULT_CAMERA_ANGLE: &str = "eye_level";
const DEFAULT_TRANSITION: &str = "cut";
const DEFAULT_STYLE_TAGS: [&str; 2] = ["cinematic", "high detail"];

/// Build the storyboard for an analysis.
pub fn build_storyboard(analyzed: &AnalyzedText, options: &JobOptions) -> Storyboard {
    Storyboard {
        characters: analyzed.characters.clone(),
        chapters: analyzed
            .chapters
            .iter()
            .map(|chapter| StoryboardChapter {
                chapter_id: chapter.chapter_id,
                title: chapter.title.clone(),
                scenes: chapter
                    .scenes
                    .iter()
                    .map(|scene| build_scene(scene, analyzed, options))
                    .collect(),
            })
            .collect(),
        plot_points: analyzed.plot_points.clone(),
    }
}

fn build_scene(scene: &Scene, analyzed: &AnalyzedText, options: &JobOptions) -> StoryboardScene {
    let characters_resolved = resolve_appearances(scene, analyzed);
    let audio_info = build_audio(scene, options);
    let estimated_duration = audio_info.iter().map(|u| u.estimated_duration).sum();

    StoryboardScene {
        scene_id: scene.scene_id,
        image_info: build_image(scene, &characters_resolved),
        audio_info,
        characters_resolved,
        estimated_duration,
    }
}

/// Overlay scene-local appearance overrides on the global appearance
/// of every character present.
fn resolve_appearances(scene: &Scene, analyzed: &AnalyzedText) -> BTreeMap<String, Appearance> {
    scene
        .characters
        .iter()
        .map(|name| {
            let global = analyzed
                .character(name)
                .map(|c| c.appearance.clone())
                .unwrap_or_default();
            let resolved = match scene.character_appearances.get(name) {
                Some(local) => global.overlaid_with(local),
                None => global,
            };
            (name.clone(), resolved)
        })
        .collect()
}

/// One audio unit per the dialogue mode, a narration unit, or silence.
fn build_audio(scene: &Scene, options: &JobOptions) -> Vec<AudioInfo> {
    if !scene.dialogue.is_empty() {
        return match options.dialogue_mode {
            DialogueMode::Merged => {
                let text = scene
                    .dialogue
                    .iter()
                    .map(|l| l.text.as_str())
                    .collect::<Vec<_>>()
                    .join(&options.dialogue_pause);
                vec![AudioInfo {
                    kind: AudioKind::Dialogue,
                    speaker: Some(scene.dialogue[0].speaker.clone()),
                    estimated_duration: estimate_duration(&text, scene.actions.len(), options),
                    text,
                }]
            }
            DialogueMode::PerLine => scene
                .dialogue
                .iter()
                .map(|line| AudioInfo {
                    kind: AudioKind::Dialogue,
                    speaker: Some(line.speaker.clone()),
                    estimated_duration: estimate_duration(&line.text, scene.actions.len(), options),
                    text: line.text.clone(),
                })
                .collect(),
        };
    }

    if let Some(narration) = scene.narration.as_deref().filter(|n| !n.trim().is_empty()) {
        return vec![AudioInfo {
            kind: AudioKind::Narration,
            speaker: None,
            estimated_duration: estimate_duration(narration, scene.actions.len(), options),
            text: narration.to_string(),
        }];
    }

    vec![AudioInfo {
        kind: AudioKind::Silence,
        speaker: None,
        text: String::new(),
        estimated_duration: options.silent_scene_duration,
    }]
}

/// `clamp(len/cps + actions * action_seconds, min, max)`.
fn estimate_duration(text: &str, action_count: usize, options: &JobOptions) -> f64 {
    let spoken = text.chars().count() as f64 / options.chars_per_second;
    let acted = action_count as f64 * options.action_seconds;
    (spoken + acted).clamp(options.duration_min, options.duration_max)
}

/// Compose the image prompt from scene and character descriptions.
fn build_image(scene: &Scene, characters: &BTreeMap<String, Appearance>) -> ImageInfo {
    let mut parts: Vec<String> = Vec::new();
    if !scene.description.is_empty() {
        parts.push(scene.description.clone());
    }
    if !scene.location.is_empty() {
        parts.push(format!("location: {}", scene.location));
    }
    if !scene.time.is_empty() {
        parts.push(format!("time: {}", scene.time));
    }
    if !scene.atmosphere.is_empty() {
        parts.push(format!("atmosphere: {}", scene.atmosphere));
    }
    if !scene.lighting.is_empty() {
        parts.push(format!("lighting: {}", scene.lighting));
    }
    for (name, appearance) in characters {
        let summary = appearance.summary();
        if summary.is_empty() {
            parts.push(name.clone());
        } else {
            parts.push(format!("{} ({})", name, summary));
        }
    }

    ImageInfo {
        prompt: parts.join(". "),
        style_tags: DEFAULT_STYLE_TAGS.iter().map(|s| s.to_string()).collect(),
        shot_type: DEFAULT_SHOT_TYPE.to_string(),
        camera_angle: DEFAULT_CAMERA_ANGLE.to_string(),
        camera_movement: String::new(),
        composition: String::new(),
        lighting: scene.lighting.clone(),
        mood: scene.atmosphere.clone(),
        transition: DEFAULT_TRANSITION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> AnalyzedText {
        serde_json::from_value(serde_json::json!({
            "characters": [
                {"name": "Mira",
                 "appearance": {"gender": "female", "age_stage": "youth", "hair": "black"}},
                {"name": "Tom",
                 "appearance": {"gender": "male", "age_stage": "adult"}}
            ],
            "chapters": [{
                "chapter_id": 1,
                "title": "One",
                "scenes": [
                    {"scene_id": 1, "description": "The harbor", "atmosphere": "calm",
                     "lighting": "dawn", "characters": ["Mira", "Tom"],
                     "dialogue": [
                        {"speaker": "Mira", "text": "The boats are gone."},
                        {"speaker": "Tom", "text": "All of them?"}
                     ],
                     "actions": ["Mira points at the pier"],
                     "character_appearances": {"Mira": {"clothing": "oilskin coat"}}},
                    {"scene_id": 2, "description": "The empty pier",
                     "characters": ["Mira"], "narration": "Nothing moved on the water."},
                    {"scene_id": 3, "description": "Fog rolls in", "characters": []}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_merged_dialogue_single_unit_with_first_speaker() {
        let options = JobOptions::default();
        let sb = build_storyboard(&analysis(), &options);
        let scene = &sb.chapters[0].scenes[0];

        assert_eq!(scene.audio_info.len(), 1);
        let unit = &scene.audio_info[0];
        assert_eq!(unit.kind, AudioKind::Dialogue);
        assert_eq!(unit.speaker.as_deref(), Some("Mira"));
        assert!(unit.text.contains("The boats are gone."));
        assert!(unit.text.contains(&options.dialogue_pause));
        assert!(unit.text.contains("All of them?"));
    }

    #[test]
    fn test_per_line_dialogue_one_unit_per_line() {
        let mut options = JobOptions::default();
        options.dialogue_mode = DialogueMode::PerLine;
        let sb = build_storyboard(&analysis(), &options);
        let scene = &sb.chapters[0].scenes[0];

        assert_eq!(scene.audio_info.len(), 2);
        assert_eq!(scene.audio_info[0].speaker.as_deref(), Some("Mira"));
        assert_eq!(scene.audio_info[1].speaker.as_deref(), Some("Tom"));
    }

    #[test]
    fn test_narration_and_silence_units() {
        let options = JobOptions::default();
        let sb = build_storyboard(&analysis(), &options);

        let narration = &sb.chapters[0].scenes[1].audio_info[0];
        assert_eq!(narration.kind, AudioKind::Narration);
        assert!(narration.speaker.is_none());

        let silence = &sb.chapters[0].scenes[2].audio_info[0];
        assert_eq!(silence.kind, AudioKind::Silence);
        assert!((silence.estimated_duration - options.silent_scene_duration).abs() < 1e-9);
    }

    #[test]
    fn test_duration_estimate_clamped() {
        let options = JobOptions::default();

        // Short text clamps up to duration_min.
        assert!((estimate_duration("hi", 0, &options) - options.duration_min).abs() < 1e-9);

        // 15 chars at 3 cps plus one action at 1.5s.
        let d = estimate_duration("123456789012345", 1, &options);
        assert!((d - 6.5).abs() < 1e-9);

        // Long text clamps down to duration_max.
        let long = "x".repeat(1000);
        assert!((estimate_duration(&long, 0, &options) - options.duration_max).abs() < 1e-9);
    }

    #[test]
    fn test_appearance_merge_overlays_scene_override() {
        let sb = build_storyboard(&analysis(), &JobOptions::default());
        let scene = &sb.chapters[0].scenes[0];
        let mira = &scene.characters_resolved["Mira"];
        // Global fields survive, the scene override lands on top.
        assert_eq!(mira.hair.as_deref(), Some("black"));
        assert_eq!(mira.clothing.as_deref(), Some("oilskin coat"));
    }

    #[test]
    fn test_image_prompt_composition_and_defaults() {
        let sb = build_storyboard(&analysis(), &JobOptions::default());
        let info = &sb.chapters[0].scenes[0].image_info;

        assert!(info.prompt.contains("The harbor"));
        assert!(info.prompt.contains("atmosphere: calm"));
        assert!(info.prompt.contains("lighting: dawn"));
        assert!(info.prompt.contains("Mira"));
        assert_eq!(info.shot_type, "medium_shot");
        assert_eq!(info.camera_angle, "eye_level");
        assert_eq!(info.transition, "cut");
        assert_eq!(info.mood, "calm");
    }

    #[test]
    fn test_storyboard_is_deterministic() {
        let options = JobOptions::default();
        let a = build_storyboard(&analysis(), &options);
        let b = build_storyboard(&analysis(), &options);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scene_estimate_is_sum_of_units() {
        let mut options = JobOptions::default();
        options.dialogue_mode = DialogueMode::PerLine;
        let sb = build_storyboard(&analysis(), &options);
        let scene = &sb.chapters[0].scenes[0];
        let sum: f64 = scene.audio_info.iter().map(|u| u.estimated_duration).sum();
        assert!((scene.estimated_duration - sum).abs() < 1e-9);
    }
}
