//! Stage 4: clip muxing and concatenation.
//!
//! Per scene: still image + audio track becomes a clip with fixed
//! codec settings. Clips concat per chapter, chapters concat into the
//! final video; single-element concats are skipped. Everything is
//! stream-copy after the initial mux, so the only re-encode happens
//! once per scene.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use sreel_media::{MediaError, MediaTool};
use sreel_models::{FinalVideo, RenderedScene, RenderedStoryboard};
use sreel_scratch::JobScratch;

use crate::error::{EngineError, EngineResult};

/// Stage-4 driver.
pub struct SceneComposer {
    media: Arc<dyn MediaTool>,
}

impl SceneComposer {
    pub fn new(media: Arc<dyn MediaTool>) -> Self {
        Self { media }
    }

    /// Build clips, concat, promote, and describe the final video.
    pub async fn compose(
        &self,
        rendered: &RenderedStoryboard,
        scratch: &JobScratch,
        cancel: &watch::Receiver<bool>,
    ) -> EngineResult<FinalVideo> {
        let mut scene_results = rendered.scenes.iter();
        let mut chapter_files: Vec<PathBuf> = Vec::new();

        for chapter in &rendered.storyboard.chapters {
            let mut clips: Vec<PathBuf> = Vec::new();
            for scene in &chapter.scenes {
                if *cancel.borrow() {
                    return Err(EngineError::Cancelled);
                }
                let result = scene_results.next().ok_or_else(|| {
                    EngineError::composition("rendered scene list shorter than storyboard")
                })?;
                let clip = scratch.temp_path(&format!(
                    "scene_c{:04}_s{:04}.mp4",
                    chapter.chapter_id, scene.scene_id
                ));
                self.build_clip(result, &clip, scratch, cancel).await?;
                clips.push(clip);
            }

            let chapter_file = if clips.len() == 1 {
                clips.remove(0)
            } else {
                let out = scratch.temp_path(&format!("chapter_{:04}.mp4", chapter.chapter_id));
                self.run_media(cancel, || self.media.concat(&clips, &out))
                    .await?;
                // Scene clips are covered by the chapter file now.
                for clip in &clips {
                    let _ = tokio::fs::remove_file(clip).await;
                }
                out
            };
            chapter_files.push(chapter_file);
        }

        // A single chapter is already the final cut.
        let final_src = if chapter_files.len() == 1 {
            chapter_files.remove(0)
        } else {
            let out = scratch.temp_path("final_cut.mp4");
            self.run_media(cancel, || self.media.concat(&chapter_files, &out))
                .await?;
            out
        };

        let promoted = scratch.promote(&final_src).await?;
        let info = self
            .media
            .probe_info(&promoted)
            .await
            .map_err(composition_error)?;

        debug!(
            path = %promoted.display(),
            duration = info.duration,
            "final video composed"
        );

        Ok(FinalVideo {
            path: promoted,
            duration_seconds: info.duration,
            byte_size: info.byte_size,
            scene_count: rendered.scenes.len() as u32,
            chapter_count: rendered.storyboard.chapters.len() as u32,
        })
    }

    /// One clip from one rendered scene.
    async fn build_clip(
        &self,
        scene: &RenderedScene,
        clip: &Path,
        scratch: &JobScratch,
        cancel: &watch::Receiver<bool>,
    ) -> EngineResult<()> {
        match scene.audio_paths.len() {
            // Silence scene: synthesize the audio bed in the mux.
            0 => {
                self.run_media(cancel, || {
                    self.media
                        .mux_still_silent(&scene.image_path, scene.final_duration, clip)
                })
                .await
            }
            1 => {
                self.run_media(cancel, || {
                    self.media
                        .mux_still(&scene.image_path, &scene.audio_paths[0], clip)
                })
                .await
            }
            // Multiple units first become one audio track.
            _ => {
                let merged = scratch.temp_path(&format!(
                    "audio_c{:04}_s{:04}.mp3",
                    scene.scene_ref.chapter_id, scene.scene_ref.scene_id
                ));
                self.run_media(cancel, || self.media.concat(&scene.audio_paths, &merged))
                    .await?;
                self.run_media(cancel, || {
                    self.media.mux_still(&scene.image_path, &merged, clip)
                })
                .await
            }
        }
    }

    /// Run a media operation; a timeout is retried exactly once.
    async fn run_media<F, Fut>(
        &self,
        cancel: &watch::Receiver<bool>,
        op: F,
    ) -> EngineResult<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = sreel_media::MediaResult<()>>,
    {
        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }
        match op().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_timeout() => {
                warn!("media operation timed out, retrying once");
                if *cancel.borrow() {
                    return Err(EngineError::Cancelled);
                }
                op().await.map_err(composition_error)
            }
            Err(e) => Err(composition_error(e)),
        }
    }
}

fn composition_error(e: MediaError) -> EngineError {
    match e {
        MediaError::Cancelled => EngineError::Cancelled,
        MediaError::FfmpegFailed {
            message,
            stderr,
            exit_code,
        } => {
            let code = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            EngineError::composition(format!(
                "{} (exit code {}): {}",
                message,
                code,
                stderr.unwrap_or_default().trim()
            ))
        }
        other => EngineError::composition(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sreel_media::{MediaInfo, MediaResult};
    use sreel_models::{JobId, JobOptions, SceneRef};
    use sreel_scratch::ScratchStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Media fake that writes clip files and can fail on schedule.
    struct ScriptedMedia {
        mux_calls: AtomicU32,
        concat_calls: AtomicU32,
        concat_log: Mutex<Vec<PathBuf>>,
        timeout_on_first_mux: bool,
        fail_concat: bool,
    }

    impl ScriptedMedia {
        fn ok() -> Self {
            Self {
                mux_calls: AtomicU32::new(0),
                concat_calls: AtomicU32::new(0),
                concat_log: Mutex::new(Vec::new()),
                timeout_on_first_mux: false,
                fail_concat: false,
            }
        }
    }

    #[async_trait]
    impl MediaTool for ScriptedMedia {
        async fn mux_still(&self, _i: &Path, _a: &Path, out: &Path) -> MediaResult<()> {
            let n = self.mux_calls.fetch_add(1, Ordering::SeqCst);
            if self.timeout_on_first_mux && n == 0 {
                return Err(MediaError::Timeout(5));
            }
            tokio::fs::write(out, b"clip").await?;
            Ok(())
        }
        async fn mux_still_silent(&self, _i: &Path, _d: f64, out: &Path) -> MediaResult<()> {
            self.mux_calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(out, b"silent-clip").await?;
            Ok(())
        }
        async fn concat(&self, inputs: &[PathBuf], out: &Path) -> MediaResult<()> {
            self.concat_calls.fetch_add(1, Ordering::SeqCst);
            self.concat_log.lock().unwrap().push(out.to_path_buf());
            if self.fail_concat {
                return Err(MediaError::ffmpeg_failed(
                    "FFmpeg exited with non-zero status",
                    Some("concat.txt: invalid entry".to_string()),
                    Some(1),
                ));
            }
            let mut body = Vec::new();
            for input in inputs {
                body.extend(tokio::fs::read(input).await?);
            }
            tokio::fs::write(out, body).await?;
            Ok(())
        }
        async fn probe_duration(&self, _path: &Path) -> MediaResult<f64> {
            Ok(2.0)
        }
        async fn probe_info(&self, path: &Path) -> MediaResult<MediaInfo> {
            Ok(MediaInfo {
                duration: 9.0,
                byte_size: std::fs::metadata(path)?.len(),
            })
        }
    }

    async fn scratch(dir: &TempDir) -> JobScratch {
        ScratchStore::new(dir.path().join("scratch"), dir.path().join("videos"))
            .open(&JobId::from_string("compose-test"))
            .await
            .unwrap()
    }

    /// Rendered storyboard with `chapters` chapters of `per` scenes.
    async fn rendered(scratch: &JobScratch, chapters: usize, per: usize) -> RenderedStoryboard {
        let chapter_json: Vec<serde_json::Value> = (0..chapters)
            .map(|c| {
                let scenes: Vec<serde_json::Value> = (0..per)
                    .map(|s| {
                        serde_json::json!({
                            "description": format!("c{} s{}", c, s),
                            "characters": [],
                            "narration": "A quiet moment on the water."
                        })
                    })
                    .collect();
                serde_json::json!({"chapter_id": c + 1, "scenes": scenes})
            })
            .collect();
        let mut analyzed: sreel_models::AnalyzedText =
            serde_json::from_value(serde_json::json!({
                "characters": [{"name": "Mira"}],
                "chapters": chapter_json
            }))
            .unwrap();
        for chapter in &mut analyzed.chapters {
            for (si, scene) in chapter.scenes.iter_mut().enumerate() {
                scene.scene_id = si as u32 + 1;
            }
        }
        let storyboard =
            crate::storyboard::build_storyboard(&analyzed, &JobOptions::default());

        let mut scenes = Vec::new();
        for chapter in &storyboard.chapters {
            for scene in &chapter.scenes {
                let name = format!("c{}s{}", chapter.chapter_id, scene.scene_id);
                let image = scratch
                    .save_image(b"png", &format!("{}.png", name))
                    .await
                    .unwrap();
                let audio = scratch
                    .save_audio(b"mp3", &format!("{}.mp3", name))
                    .await
                    .unwrap();
                scenes.push(RenderedScene {
                    scene_ref: SceneRef {
                        chapter_id: chapter.chapter_id,
                        scene_id: scene.scene_id,
                    },
                    image_path: image,
                    audio_paths: vec![audio],
                    measured_audio_duration: 2.0,
                    final_duration: scene.estimated_duration.max(2.0),
                });
            }
        }
        RenderedStoryboard { storyboard, scenes }
    }

    #[tokio::test]
    async fn test_single_chapter_skips_final_concat() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let media = Arc::new(ScriptedMedia::ok());
        let composer = SceneComposer::new(media.clone());
        let rendered = rendered(&scratch, 1, 3).await;
        let (_tx, cancel) = watch::channel(false);

        let video = composer.compose(&rendered, &scratch, &cancel).await.unwrap();

        assert_eq!(video.scene_count, 3);
        assert_eq!(video.chapter_count, 1);
        assert!(video.path.exists());
        assert!(video.path.ends_with("compose-test/final.mp4"));

        // One concat for the chapter, none for the final cut.
        assert_eq!(media.concat_calls.load(Ordering::SeqCst), 1);
        let log = media.concat_log.lock().unwrap();
        assert!(log[0].to_string_lossy().contains("chapter_0001"));
    }

    #[tokio::test]
    async fn test_single_scene_single_chapter_promotes_the_clip() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let media = Arc::new(ScriptedMedia::ok());
        let composer = SceneComposer::new(media.clone());
        let rendered = rendered(&scratch, 1, 1).await;
        let (_tx, cancel) = watch::channel(false);

        let video = composer.compose(&rendered, &scratch, &cancel).await.unwrap();
        assert_eq!(media.concat_calls.load(Ordering::SeqCst), 0);
        assert!(video.path.exists());
    }

    #[tokio::test]
    async fn test_multi_chapter_runs_final_concat() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let media = Arc::new(ScriptedMedia::ok());
        let composer = SceneComposer::new(media.clone());
        let rendered = rendered(&scratch, 2, 2).await;
        let (_tx, cancel) = watch::channel(false);

        let video = composer.compose(&rendered, &scratch, &cancel).await.unwrap();
        assert_eq!(video.scene_count, 4);
        assert_eq!(video.chapter_count, 2);
        // Two chapter concats plus the final concat.
        assert_eq!(media.concat_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let media = Arc::new(ScriptedMedia {
            timeout_on_first_mux: true,
            ..ScriptedMedia::ok()
        });
        let composer = SceneComposer::new(media.clone());
        let rendered = rendered(&scratch, 1, 1).await;
        let (_tx, cancel) = watch::channel(false);

        composer.compose(&rendered, &scratch, &cancel).await.unwrap();
        assert_eq!(media.mux_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_is_fatal_with_stderr() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let media = Arc::new(ScriptedMedia {
            fail_concat: true,
            ..ScriptedMedia::ok()
        });
        let composer = SceneComposer::new(media);
        let rendered = rendered(&scratch, 1, 2).await;
        let (_tx, cancel) = watch::channel(false);

        let err = composer.compose(&rendered, &scratch, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Composition(_)));
        assert!(err.to_string().contains("invalid entry"));
    }

    #[tokio::test]
    async fn test_cancel_between_clips() {
        let dir = TempDir::new().unwrap();
        let scratch = scratch(&dir).await;
        let composer = SceneComposer::new(Arc::new(ScriptedMedia::ok()));
        let rendered = rendered(&scratch, 1, 2).await;
        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let err = composer.compose(&rendered, &scratch, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
