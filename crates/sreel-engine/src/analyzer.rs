//! Stage 1: text understanding.
//!
//! Calls the text model (simple or windowed), parses the entity graph,
//! merges windowed results, and enforces the submission limits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use sreel_ai::{AiError, TextModel};
use sreel_models::{AnalyzedText, AnalyzerMode, Character, JobOptions};

use crate::error::{EngineError, EngineResult};
use crate::retry::{ai_retry_class, retry_with_backoff, RetryPolicy};

/// Inputs shorter than this are rejected before any adapter call.
pub const MIN_TEXT_LENGTH: usize = 200;

const ANALYSIS_PROMPT: &str = "\
You are a story analyst. Read the novel text and return ONLY a JSON object with:
- \"characters\": array of {\"name\", \"appearance\": {\"gender\": male|female|unknown, \
\"age\", \"age_stage\": child|youth|adult|elder|unknown, \"hair\", \"eyes\", \"clothing\", \
\"features\", \"body_type\", \"height\", \"skin\"}, \"personality\", \"role\", \
\"age_variants\": [{\"age_stage\", \"appearance\"}]}
- \"chapters\": array of {\"chapter_id\", \"title\", \"scenes\": [{\"location\", \"time\", \
\"description\", \"atmosphere\", \"lighting\", \"characters\": [names], \"narration\", \
\"dialogue\": [{\"speaker\", \"text\"}], \"actions\": [strings], \
\"character_appearances\": {name: appearance}}]}
- \"plot_points\": array of {\"scene_ref\": global 1-based scene index, \
\"kind\": conflict|climax|resolution|normal, \"description\"}
Scenes must follow text order. Every dialogue speaker must appear in \"characters\".
Novel text follows.";

/// Stage-1 analysis with its non-fatal warnings.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub analyzed: AnalyzedText,
    pub warnings: Vec<String>,
}

/// Stage-1 driver.
pub struct TextAnalyzer {
    model: Arc<dyn TextModel>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl TextAnalyzer {
    pub fn new(
        model: Arc<dyn TextModel>,
        retry_base_delay: Duration,
        retry_max_delay: Duration,
    ) -> Self {
        Self {
            model,
            retry_base_delay,
            retry_max_delay,
        }
    }

    /// Run the analysis per `options.analyzer_mode`.
    pub async fn analyze(
        &self,
        text: &str,
        options: &JobOptions,
        cancel: &mut watch::Receiver<bool>,
    ) -> EngineResult<AnalysisOutcome> {
        let text = text.trim();
        if text.chars().count() < MIN_TEXT_LENGTH {
            return Err(EngineError::validation(format!(
                "input text too short: {} chars (minimum {})",
                text.chars().count(),
                MIN_TEXT_LENGTH
            )));
        }

        let analyzed = match options.analyzer_mode {
            AnalyzerMode::Simple => self.analyze_window(text, options, cancel).await?,
            AnalyzerMode::Chunked => {
                let windows = split_windows(text, options.chunk_size);
                debug!(windows = windows.len(), "chunked analysis");
                let mut parts = Vec::with_capacity(windows.len());
                for window in windows {
                    parts.push(self.analyze_window(window, options, cancel).await?);
                }
                merge_analyses(parts)
            }
        };

        let (analyzed, warnings) = enforce_limits(analyzed, options);
        validate(&analyzed)?;
        Ok(AnalysisOutcome { analyzed, warnings })
    }

    /// One adapter call through the retry harness, then parse.
    async fn analyze_window(
        &self,
        window: &str,
        options: &JobOptions,
        cancel: &mut watch::Receiver<bool>,
    ) -> EngineResult<AnalyzedText> {
        let policy = RetryPolicy::new(options.retry_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay);
        let request_timeout = Duration::from_secs(options.request_timeout_secs);

        let value = retry_with_backoff(
            &policy,
            cancel,
            || {
                let fut = self.model.analyze(ANALYSIS_PROMPT, window);
                async move {
                    match tokio::time::timeout(request_timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(AiError::Timeout(request_timeout.as_secs())),
                    }
                }
            },
            ai_retry_class,
        )
        .await
        .map_err(EngineError::from)?;

        let mut analyzed: AnalyzedText = serde_json::from_value(value).map_err(|e| {
            EngineError::model_output(format!("analysis JSON does not match schema: {}", e))
        })?;
        renumber(&mut analyzed);
        Ok(analyzed)
    }
}

/// Split text into windows of at most `chunk_size` chars, preferring a
/// paragraph boundary in the tail half of each window.
fn split_windows(text: &str, chunk_size: usize) -> Vec<&str> {
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let window_end = match text[start..].char_indices().nth(chunk_size) {
            Some((offset, _)) => start + offset,
            None => text.len(),
        };
        if window_end == text.len() {
            windows.push(&text[start..]);
            break;
        }

        let slice = &text[start..window_end];
        let min_cut = slice.len() / 2;
        let cut = slice
            .rfind("\n\n")
            .filter(|&p| p >= min_cut)
            .map(|p| start + p + 2)
            .unwrap_or(window_end);

        windows.push(&text[start..cut]);
        start = cut;
    }

    windows.retain(|w| !w.trim().is_empty());
    windows
}

/// Renumber chapter and scene ids in encounter order.
fn renumber(analyzed: &mut AnalyzedText) {
    for (ci, chapter) in analyzed.chapters.iter_mut().enumerate() {
        chapter.chapter_id = ci as u32 + 1;
        for (si, scene) in chapter.scenes.iter_mut().enumerate() {
            scene.scene_id = si as u32 + 1;
        }
    }
}

/// Merge per-window analyses into one.
fn merge_analyses(parts: Vec<AnalyzedText>) -> AnalyzedText {
    let mut characters: Vec<Character> = Vec::new();
    let mut chapters = Vec::new();
    let mut plot_points = Vec::new();
    let mut scene_offset = 0u32;

    for part in parts {
        for incoming in part.characters {
            match characters.iter_mut().find(|c| c.name == incoming.name) {
                Some(existing) => merge_character(existing, incoming),
                None => characters.push(incoming),
            }
        }

        let part_scene_count: u32 = part.chapters.iter().map(|c| c.scenes.len() as u32).sum();
        chapters.extend(part.chapters);

        for mut point in part.plot_points {
            point.scene_ref += scene_offset;
            plot_points.push(point);
        }
        scene_offset += part_scene_count;
    }

    let mut merged = AnalyzedText {
        characters,
        chapters,
        plot_points,
    };
    renumber(&mut merged);
    merged
}

/// Union a later sighting into an existing character: non-empty
/// attributes win, first occurrence wins otherwise; age variants
/// accumulate distinct stages.
fn merge_character(existing: &mut Character, incoming: Character) {
    existing.appearance = incoming.appearance.overlaid_with(&existing.appearance);
    if existing.personality.is_empty() {
        existing.personality = incoming.personality;
    }
    if existing.role.is_empty() {
        existing.role = incoming.role;
    }
    for variant in incoming.age_variants {
        if !existing
            .age_variants
            .iter()
            .any(|v| v.age_stage == variant.age_stage)
        {
            existing.age_variants.push(variant);
        }
    }
}

/// Promote unknown names, then apply the scene and character caps.
fn enforce_limits(mut analyzed: AnalyzedText, options: &JobOptions) -> (AnalyzedText, Vec<String>) {
    let mut warnings = Vec::new();

    // Every referenced name becomes a known character.
    let mut known: HashSet<String> = analyzed.characters.iter().map(|c| c.name.clone()).collect();
    let mut promoted = Vec::new();
    for chapter in &analyzed.chapters {
        for scene in &chapter.scenes {
            for name in scene
                .characters
                .iter()
                .chain(scene.dialogue.iter().map(|l| &l.speaker))
            {
                if !known.contains(name) {
                    known.insert(name.clone());
                    promoted.push(name.clone());
                }
            }
        }
    }
    for name in promoted {
        debug!(character = %name, "promoting unlisted character");
        analyzed.characters.push(Character::unknown(name));
    }

    // Scene cap: truncate from the tail.
    let total_scenes = analyzed.scene_count();
    let max_scenes = options.max_scenes as usize;
    if total_scenes > max_scenes {
        warnings.push(format!(
            "analysis produced {} scenes, keeping the first {}",
            total_scenes, max_scenes
        ));
        let mut remaining = max_scenes;
        analyzed.chapters.retain_mut(|chapter| {
            if remaining == 0 {
                return false;
            }
            if chapter.scenes.len() > remaining {
                chapter.scenes.truncate(remaining);
            }
            remaining -= chapter.scenes.len();
            true
        });
        analyzed
            .plot_points
            .retain(|p| (1..=max_scenes as u32).contains(&p.scene_ref));
        renumber(&mut analyzed);
    }

    // Character cap: drop lowest-mention first, never dropping a
    // speaker while a non-speaker remains.
    let max_characters = options.max_characters as usize;
    if analyzed.characters.len() > max_characters {
        let mut mentions: std::collections::HashMap<&str, usize> = Default::default();
        let mut speakers: HashSet<&str> = Default::default();
        for chapter in &analyzed.chapters {
            for scene in &chapter.scenes {
                for name in &scene.characters {
                    *mentions.entry(name.as_str()).or_default() += 1;
                }
                for line in &scene.dialogue {
                    *mentions.entry(line.speaker.as_str()).or_default() += 1;
                    speakers.insert(line.speaker.as_str());
                }
            }
        }

        let mut ranked: Vec<(bool, usize, String)> = analyzed
            .characters
            .iter()
            .map(|c| {
                (
                    speakers.contains(c.name.as_str()),
                    mentions.get(c.name.as_str()).copied().unwrap_or(0),
                    c.name.clone(),
                )
            })
            .collect();
        ranked.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        let keep: HashSet<String> = ranked
            .iter()
            .take(max_characters)
            .map(|(_, _, name)| name.clone())
            .collect();
        warnings.push(format!(
            "analysis produced {} characters, keeping the {} most mentioned",
            analyzed.characters.len(),
            max_characters
        ));

        analyzed.characters.retain(|c| keep.contains(&c.name));
        for chapter in &mut analyzed.chapters {
            for scene in &mut chapter.scenes {
                scene.characters.retain(|n| keep.contains(n));
                scene.character_appearances.retain(|n, _| keep.contains(n));
                scene.dialogue.retain(|l| keep.contains(&l.speaker));
            }
        }
    }

    (analyzed, warnings)
}

/// Fail fast on an empty analysis.
fn validate(analyzed: &AnalyzedText) -> EngineResult<()> {
    if analyzed.characters.is_empty() {
        return Err(EngineError::validation("analysis produced no characters"));
    }
    if analyzed.chapters.is_empty() {
        return Err(EngineError::validation("analysis produced no chapters"));
    }
    for chapter in &analyzed.chapters {
        if chapter.scenes.is_empty() {
            return Err(EngineError::validation(format!(
                "chapter {} has no scenes",
                chapter.chapter_id
            )));
        }
    }
    Ok(())
}
