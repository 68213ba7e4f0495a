//! Stage 3: per-scene asset rendering.
//!
//! Voices are pre-assigned over the whole storyboard before any
//! rendering so scene order can never shuffle voice choices. Scenes
//! then render through the retry harness, optionally fanned out up to
//! `max_parallel_scenes`, folding back into storyboard order.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use sreel_ai::{AiError, AudioEncoding, ImageModel, SpeechModel};
use sreel_media::{MediaError, MediaTool};
use sreel_models::{
    AudioKind, JobOptions, RenderedScene, RenderedStoryboard, SceneRef, Storyboard,
    StoryboardScene,
};
use sreel_scratch::JobScratch;

use crate::error::{EngineError, EngineResult};
use crate::retry::{ai_retry_class, retry_with_backoff, RetryPolicy};
use crate::voices::VoiceRegistry;

/// Speech tempo passed to the synthesizer.
const SPEECH_SPEED: f64 = 1.0;

/// Stage-3 driver.
pub struct SceneRenderer {
    image_model: Arc<dyn ImageModel>,
    speech_model: Arc<dyn SpeechModel>,
    media: Arc<dyn MediaTool>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl SceneRenderer {
    pub fn new(
        image_model: Arc<dyn ImageModel>,
        speech_model: Arc<dyn SpeechModel>,
        media: Arc<dyn MediaTool>,
        retry_base_delay: Duration,
        retry_max_delay: Duration,
    ) -> Self {
        Self {
            image_model,
            speech_model,
            media,
            retry_base_delay,
            retry_max_delay,
        }
    }

    /// Render every scene; `on_scene(done, total)` fires in storyboard
    /// order as results fold in.
    pub async fn render<F>(
        &self,
        storyboard: &Storyboard,
        scratch: &JobScratch,
        options: &JobOptions,
        cancel: &watch::Receiver<bool>,
        mut on_scene: F,
    ) -> EngineResult<RenderedStoryboard>
    where
        F: FnMut(usize, usize),
    {
        let voices = assign_voices(storyboard, options);
        debug!(speakers = voices.assignments().len(), "voices pre-assigned");

        let tasks: Vec<(u32, &StoryboardScene)> = storyboard
            .chapters
            .iter()
            .flat_map(|c| c.scenes.iter().map(move |s| (c.chapter_id, s)))
            .collect();
        let total = tasks.len();

        let concurrency = options.max_parallel_scenes.max(1);
        let mut futs: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = EngineResult<RenderedScene>> + Send + '_>>,
        > = Vec::with_capacity(total);
        for (chapter_id, scene) in tasks {
            futs.push(Box::pin(
                self.render_scene(chapter_id, scene, &voices, scratch, options, cancel.clone()),
            ));
        }
        let mut results = stream::iter(futs).buffered(concurrency);

        let mut scenes = Vec::with_capacity(total);
        while let Some(result) = results.next().await {
            scenes.push(result?);
            on_scene(scenes.len(), total);
            if *cancel.borrow() {
                return Err(EngineError::Cancelled);
            }
        }
        drop(results);

        Ok(RenderedStoryboard {
            storyboard: storyboard.clone(),
            scenes,
        })
    }

    async fn render_scene(
        &self,
        chapter_id: u32,
        scene: &StoryboardScene,
        voices: &VoiceRegistry,
        scratch: &JobScratch,
        options: &JobOptions,
        mut cancel: watch::Receiver<bool>,
    ) -> EngineResult<RenderedScene> {
        let scene_ref = SceneRef {
            chapter_id,
            scene_id: scene.scene_id,
        };
        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let policy = RetryPolicy::new(options.retry_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay);
        let request_timeout = Duration::from_secs(options.request_timeout_secs);

        // Still image for the scene.
        let image_bytes = retry_with_backoff(
            &policy,
            &mut cancel,
            || {
                let fut = self.image_model.generate(
                    &scene.image_info.prompt,
                    &options.image_size,
                    options.image_seed,
                );
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
        .map_err(|e| EngineError::from(e).in_scene(scene_ref))?;

        let image_name = format!("scene_c{:04}_s{:04}.png", chapter_id, scene.scene_id);
        let image_path = scratch.save_image(&image_bytes, &image_name).await?;

        // One speech call per non-silence audio unit.
        let mut audio_paths = Vec::new();
        for (unit_index, unit) in scene.audio_info.iter().enumerate() {
            if unit.is_silence() {
                continue;
            }
            if *cancel.borrow() {
                return Err(EngineError::Cancelled);
            }

            let voice = match unit.kind {
                AudioKind::Dialogue => unit
                    .speaker
                    .as_deref()
                    .and_then(|s| voices.get(s))
                    .unwrap_or_else(|| voices.default_voice())
                    .to_string(),
                _ => voices.voice_for_narration().to_string(),
            };

            let encoding = AudioEncoding::Mp3;
            let audio_bytes = retry_with_backoff(
                &policy,
                &mut cancel,
                || {
                    let fut = self
                        .speech_model
                        .synthesize(&unit.text, &voice, SPEECH_SPEED, encoding);
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
            .map_err(|e| EngineError::from(e).in_scene(scene_ref))?;

            let audio_name = format!(
                "scene_c{:04}_s{:04}_u{:02}.{}",
                chapter_id,
                scene.scene_id,
                unit_index,
                encoding.extension()
            );
            audio_paths.push(scratch.save_audio(&audio_bytes, &audio_name).await?);
        }

        // Measured duration is what the synthesizer actually produced.
        let mut measured = 0.0;
        for path in &audio_paths {
            measured += self.media.probe_duration(path).await.map_err(|e| match e {
                MediaError::Cancelled => EngineError::Cancelled,
                other => EngineError::render(scene_ref, format!("audio probe failed: {}", other)),
            })?;
        }

        let final_duration = scene.estimated_duration.max(measured);
        debug!(
            %scene_ref,
            estimated = scene.estimated_duration,
            measured,
            "scene rendered"
        );

        Ok(RenderedScene {
            scene_ref,
            image_path,
            audio_paths,
            measured_audio_duration: measured,
            final_duration,
        })
    }
}

/// Walk every dialogue unit in storyboard order and fix its voice.
fn assign_voices(storyboard: &Storyboard, options: &JobOptions) -> VoiceRegistry {
    let mut voices = VoiceRegistry::from_options(options);
    for chapter in &storyboard.chapters {
        for scene in &chapter.scenes {
            for unit in &scene.audio_info {
                if unit.kind != AudioKind::Dialogue {
                    continue;
                }
                let Some(speaker) = &unit.speaker else {
                    continue;
                };
                let appearance = scene
                    .characters_resolved
                    .get(speaker)
                    .cloned()
                    .or_else(|| storyboard.character(speaker).map(|c| c.appearance.clone()))
                    .unwrap_or_default();
                voices.assign(speaker, &appearance);
            }
        }
    }
    voices
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sreel_ai::AiResult;
    use sreel_media::{MediaInfo, MediaResult};
    use sreel_models::JobId;
    use sreel_scratch::ScratchStore;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct FakeImage {
        calls: AtomicU32,
        fail_first: u32,
        delay_ms: u64,
    }

    #[async_trait]
    impl ImageModel for FakeImage {
        async fn generate(&self, _p: &str, _s: &str, _seed: Option<u64>) -> AiResult<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if n < self.fail_first {
                return Err(AiError::Status {
                    status: 503,
                    body: "busy".to_string(),
                });
            }
            Ok(b"png".to_vec())
        }
    }

    struct FakeSpeech {
        calls: AtomicU32,
        malformed_on_call: Option<u32>,
    }

    #[async_trait]
    impl SpeechModel for FakeSpeech {
        async fn synthesize(
            &self,
            _text: &str,
            _voice: &str,
            _speed: f64,
            _enc: AudioEncoding,
        ) -> AiResult<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.malformed_on_call == Some(n) {
                return Err(AiError::malformed("audio payload is not valid base64"));
            }
            Ok(b"mp3".to_vec())
        }
    }

    struct FakeMedia {
        audio_duration: f64,
    }

    #[async_trait]
    impl MediaTool for FakeMedia {
        async fn mux_still(&self, _i: &Path, _a: &Path, out: &Path) -> MediaResult<()> {
            tokio::fs::write(out, b"clip").await?;
            Ok(())
        }
        async fn mux_still_silent(&self, _i: &Path, _d: f64, out: &Path) -> MediaResult<()> {
            tokio::fs::write(out, b"clip").await?;
            Ok(())
        }
        async fn concat(&self, _inputs: &[PathBuf], out: &Path) -> MediaResult<()> {
            tokio::fs::write(out, b"concat").await?;
            Ok(())
        }
        async fn probe_duration(&self, _path: &Path) -> MediaResult<f64> {
            Ok(self.audio_duration)
        }
        async fn probe_info(&self, path: &Path) -> MediaResult<MediaInfo> {
            Ok(MediaInfo {
                duration: self.audio_duration,
                byte_size: std::fs::metadata(path)?.len(),
            })
        }
    }

    fn storyboard(scene_count: usize) -> Storyboard {
        let scenes: Vec<serde_json::Value> = (0..scene_count)
            .map(|i| {
                serde_json::json!({
                    "description": format!("scene {}", i),
                    "characters": ["Mira"],
                    "dialogue": [{"speaker": "Mira", "text": "Twelve chars."}]
                })
            })
            .collect();
        let analyzed: sreel_models::AnalyzedText =
            serde_json::from_value(serde_json::json!({
                "characters": [{"name": "Mira",
                    "appearance": {"gender": "female", "age_stage": "youth"}}],
                "chapters": [{"chapter_id": 1, "scenes": scenes}]
            }))
            .unwrap();
        let mut analyzed = analyzed;
        for (si, scene) in analyzed.chapters[0].scenes.iter_mut().enumerate() {
            scene.scene_id = si as u32 + 1;
        }
        crate::storyboard::build_storyboard(&analyzed, &JobOptions::default())
    }

    async fn scratch(dir: &TempDir) -> JobScratch {
        ScratchStore::new(dir.path().join("scratch"), dir.path().join("videos"))
            .open(&JobId::from_string("render-test"))
            .await
            .unwrap()
    }

    fn renderer(image: FakeImage, speech: FakeSpeech, media: FakeMedia) -> SceneRenderer {
        SceneRenderer::new(
            Arc::new(image),
            Arc::new(speech),
            Arc::new(media),
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    fn fake_image() -> FakeImage {
        FakeImage {
            calls: AtomicU32::new(0),
            fail_first: 0,
            delay_ms: 0,
        }
    }

    fn fake_speech() -> FakeSpeech {
        FakeSpeech {
            calls: AtomicU32::new(0),
            malformed_on_call: None,
        }
    }

    #[tokio::test]
    async fn test_renders_scenes_in_order_with_final_duration() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let r = renderer(fake_image(), fake_speech(), FakeMedia { audio_duration: 2.0 });
        let sb = storyboard(3);
        let (_tx, cancel) = watch::channel(false);

        let mut progress = Vec::new();
        let rendered = r
            .render(&sb, &scratch, &JobOptions::default(), &cancel, |done, total| {
                progress.push((done, total))
            })
            .await
            .unwrap();

        assert_eq!(rendered.scenes.len(), 3);
        for (i, scene) in rendered.scenes.iter().enumerate() {
            assert_eq!(scene.scene_ref.scene_id, i as u32 + 1);
            assert!(scene.image_path.exists());
            assert_eq!(scene.audio_paths.len(), 1);
            // Measured 2.0 < estimated (>= duration_min 3.0).
            assert!(scene.final_duration >= scene.measured_audio_duration);
            assert!((scene.final_duration - sb.chapters[0].scenes[i].estimated_duration).abs() < 1e-9);
        }
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_parallel_rendering_preserves_order() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let r = renderer(
            FakeImage {
                calls: AtomicU32::new(0),
                fail_first: 0,
                delay_ms: 20,
            },
            fake_speech(),
            FakeMedia { audio_duration: 9.9 },
        );
        let sb = storyboard(4);
        let (_tx, cancel) = watch::channel(false);
        let mut options = JobOptions::default();
        options.max_parallel_scenes = 4;

        let rendered = r
            .render(&sb, &scratch, &options, &cancel, |_, _| {})
            .await
            .unwrap();
        let ids: Vec<u32> = rendered.scenes.iter().map(|s| s.scene_ref.scene_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        // Measured 9.9 dominates the estimate here.
        assert!(rendered.scenes.iter().all(|s| (s.final_duration - 9.9).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_transient_image_failures_are_absorbed() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let image = FakeImage {
            calls: AtomicU32::new(0),
            fail_first: 2,
            delay_ms: 0,
        };
        let r = renderer(image, fake_speech(), FakeMedia { audio_duration: 2.0 });
        let sb = storyboard(1);
        let (_tx, cancel) = watch::channel(false);

        let rendered = r
            .render(&sb, &scratch, &JobOptions::default(), &cancel, |_, _| {})
            .await
            .unwrap();
        assert_eq!(rendered.scenes.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_speech_fails_with_scene_context() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let speech = FakeSpeech {
            calls: AtomicU32::new(0),
            malformed_on_call: Some(2),
        };
        let r = renderer(fake_image(), speech, FakeMedia { audio_duration: 2.0 });
        let sb = storyboard(3);
        let (_tx, cancel) = watch::channel(false);

        let err = r
            .render(&sb, &scratch, &JobOptions::default(), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelOutput(_)));
        assert!(err.to_string().contains("chapter 1 scene 2"));
    }

    #[tokio::test]
    async fn test_voice_assignment_stable_regardless_of_scene_order() {
        let sb = storyboard(3);
        let options = JobOptions::default();
        let a = assign_voices(&sb, &options);

        let mut reversed = sb.clone();
        reversed.chapters[0].scenes.reverse();
        let b = assign_voices(&reversed, &options);

        assert_eq!(a.assignments()["Mira"], b.assignments()["Mira"]);
    }
}
