//! Per-job speaker-to-voice assignment.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use sreel_models::{builtin_catalog, Appearance, JobOptions, VoiceSpec};

/// Write-once mapping from speaker name to voice id.
///
/// Candidates are filtered by exact (gender, age_stage) match against
/// the speaker's appearance; ties are broken by a stable hash of the
/// speaker name so assignment does not depend on scene order or prior
/// assignments.
#[derive(Debug)]
pub struct VoiceRegistry {
    catalog: Vec<VoiceSpec>,
    narrator_voice: String,
    default_voice: String,
    assignments: HashMap<String, String>,
}

impl VoiceRegistry {
    pub fn new(
        catalog: Vec<VoiceSpec>,
        narrator_voice: impl Into<String>,
        default_voice: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            narrator_voice: narrator_voice.into(),
            default_voice: default_voice.into(),
            assignments: HashMap::new(),
        }
    }

    /// Build a registry from job options (catalog override or builtin).
    pub fn from_options(options: &JobOptions) -> Self {
        let catalog = options
            .voice_catalog
            .clone()
            .unwrap_or_else(builtin_catalog);
        Self::new(catalog, &options.narrator_voice, &options.default_voice)
    }

    /// Assign a voice to a speaker; the first assignment wins.
    pub fn assign(&mut self, speaker: &str, appearance: &Appearance) -> String {
        if let Some(existing) = self.assignments.get(speaker) {
            return existing.clone();
        }

        let candidates: Vec<&VoiceSpec> = self
            .catalog
            .iter()
            .filter(|v| v.gender == appearance.gender && v.age_stage == appearance.age_stage)
            .collect();

        let voice_id = if candidates.is_empty() {
            self.default_voice.clone()
        } else {
            let index = (stable_hash(speaker) % candidates.len() as u64) as usize;
            candidates[index].id.clone()
        };

        debug!(speaker, voice = %voice_id, "assigned voice");
        self.assignments.insert(speaker.to_string(), voice_id.clone());
        voice_id
    }

    /// Voice already assigned to a speaker, if any.
    pub fn get(&self, speaker: &str) -> Option<&str> {
        self.assignments.get(speaker).map(String::as_str)
    }

    /// The narrator voice, independent of speaker mapping.
    pub fn voice_for_narration(&self) -> &str {
        &self.narrator_voice
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn assignments(&self) -> &HashMap<String, String> {
        &self.assignments
    }
}

/// Stable 64-bit hash of a speaker name.
fn stable_hash(speaker: &str) -> u64 {
    let digest = Sha256::digest(speaker.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
