//! The job orchestrator: accepts submissions, drives the four stages,
//! and publishes progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use sreel_ai::{
    GeminiTextModel, HttpImageModel, HttpSpeechModel, ImageModel, SpeechModel, TextModel,
};
use sreel_events::{EventBus, Subscription};
use sreel_media::{EncodeSettings, FfmpegTool, MediaTool};
use sreel_models::{ErrorKind, FinalVideo, Job, JobEvent, JobId, JobOptions, Stage};
use sreel_scratch::{JobScratch, ScratchStore};

use crate::analyzer::TextAnalyzer;
use crate::composer::SceneComposer;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::logging::JobLogger;
use crate::renderer::SceneRenderer;
use crate::storyboard::build_storyboard;

/// Progress reached when stage 1 completes.
const PCT_ANALYZED: u8 = 20;
/// Progress reached when stage 2 completes.
const PCT_STORYBOARDED: u8 = 30;
/// Progress reached when stage 3 completes; stage 3 is linear in
/// scenes over (PCT_STORYBOARDED, PCT_RENDERED].
const PCT_RENDERED: u8 = 70;
/// Progress at the end of the pipeline.
const PCT_DONE: u8 = 100;

/// The pipeline runtime. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    bus: EventBus,
    scratch_store: ScratchStore,
    analyzer: TextAnalyzer,
    renderer: SceneRenderer,
    composer: SceneComposer,
    jobs: Mutex<HashMap<String, Job>>,
    cancel_signals: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        bus: EventBus,
        text_model: Arc<dyn TextModel>,
        image_model: Arc<dyn ImageModel>,
        speech_model: Arc<dyn SpeechModel>,
        media: Arc<dyn MediaTool>,
    ) -> Self {
        let scratch_store = ScratchStore::new(&config.scratch_base, &config.videos_base);
        let analyzer = TextAnalyzer::new(
            text_model,
            config.retry_base_delay,
            config.retry_max_delay,
        );
        let renderer = SceneRenderer::new(
            image_model,
            speech_model,
            media.clone(),
            config.retry_base_delay,
            config.retry_max_delay,
        );
        let composer = SceneComposer::new(media);

        Self {
            inner: Arc::new(EngineInner {
                bus,
                scratch_store,
                analyzer,
                renderer,
                composer,
                jobs: Mutex::new(HashMap::new()),
                cancel_signals: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Production wiring: HTTP adapters from the environment and an
    /// FFmpeg tool configured per [`EngineConfig`].
    pub fn from_env() -> EngineResult<Self> {
        let config = EngineConfig::from_env();
        let text_model =
            GeminiTextModel::from_env().map_err(|e| EngineError::validation(e.to_string()))?;
        let image_model =
            HttpImageModel::from_env().map_err(|e| EngineError::validation(e.to_string()))?;
        let speech_model =
            HttpSpeechModel::from_env().map_err(|e| EngineError::validation(e.to_string()))?;
        let media = FfmpegTool::new(EncodeSettings::default())
            .with_timeout(config.mux_timeout.as_secs());

        Ok(Self::new(
            config,
            EventBus::new(),
            Arc::new(text_model),
            Arc::new(image_model),
            Arc::new(speech_model),
            Arc::new(media),
        ))
    }

    /// The shared event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Accept a job and start driving it; returns synchronously.
    pub fn submit(
        &self,
        input_text: impl Into<String>,
        options: JobOptions,
    ) -> EngineResult<JobId> {
        options.check().map_err(EngineError::validation)?;

        let job = Job::new(input_text, options);
        let job_id = job.id.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.inner
            .jobs_lock()
            .insert(job_id.as_str().to_string(), job);
        self.inner
            .cancel_lock()
            .insert(job_id.as_str().to_string(), cancel_tx);

        let inner = self.inner.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            run_job(inner, id, cancel_rx).await;
        });

        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Request cooperative cancellation. Returns false for unknown or
    /// already-finished jobs.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.cancel_lock().get(job_id.as_str()) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Snapshot of a job's current record.
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.inner.jobs_lock().get(job_id.as_str()).cloned()
    }

    /// Subscribe to a job's progress stream.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        self.inner.bus.subscribe(job_id)
    }
}

impl EngineInner {
    fn jobs_lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.cancel_signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the job record and publish the event, with the job's
    /// monotone progress as the source of truth.
    fn publish_progress(&self, job_id: &JobId, stage: Stage, pct: u8, message: &str) {
        let pct = {
            let mut jobs = self.jobs_lock();
            match jobs.get_mut(job_id.as_str()) {
                Some(job) => {
                    job.advance(stage, pct, message);
                    job.progress
                }
                None => pct.min(100),
            }
        };
        self.bus
            .publish(job_id, JobEvent::progress(stage, pct, message));
    }
}

/// Drive one job to a terminal state.
async fn run_job(inner: Arc<EngineInner>, job_id: JobId, cancel: watch::Receiver<bool>) {
    let logger = JobLogger::new(&job_id, Stage::Init);

    let Some((input_text, options)) = ({
        let mut jobs = inner.jobs_lock();
        jobs.get_mut(job_id.as_str()).map(|job| {
            job.start();
            (job.input_text.clone(), job.options.clone())
        })
    }) else {
        return;
    };

    logger.log_start("job picked up");
    inner.publish_progress(&job_id, Stage::Init, 0, "job started");

    let scratch = match inner.scratch_store.open(&job_id).await {
        Ok(scratch) => scratch,
        Err(e) => {
            finish_with_error(&inner, &job_id, &options, None, EngineError::from(e)).await;
            return;
        }
    };

    let result = match options.job_timeout_secs {
        Some(secs) => {
            let pipeline = drive(&inner, &job_id, &input_text, &options, &scratch, cancel);
            match tokio::time::timeout(Duration::from_secs(secs), pipeline).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::external(format!(
                    "job timed out after {} seconds",
                    secs
                ))),
            }
        }
        None => drive(&inner, &job_id, &input_text, &options, &scratch, cancel).await,
    };

    match result {
        Ok(video) => {
            if let Some(job) = inner.jobs_lock().get_mut(job_id.as_str()) {
                job.complete(video.clone());
            }
            inner.bus.publish(&job_id, JobEvent::completed(video));
            logger.log_completion("final video ready");
            let _ = scratch.cleanup().await;
        }
        Err(e) => {
            finish_with_error(&inner, &job_id, &options, Some(&scratch), e).await;
        }
    }

    inner.cancel_lock().remove(job_id.as_str());
}

async fn finish_with_error(
    inner: &EngineInner,
    job_id: &JobId,
    options: &JobOptions,
    scratch: Option<&JobScratch>,
    error: EngineError,
) {
    let logger = JobLogger::new(job_id, Stage::Init);
    let kind = error.kind();
    let detail = error.to_string();

    if let Some(job) = inner.jobs_lock().get_mut(job_id.as_str()) {
        if kind == ErrorKind::Cancelled {
            job.cancel();
        } else {
            job.fail(kind, detail.clone());
        }
    }
    inner.bus.publish(job_id, JobEvent::failed(kind, detail.clone()));

    if kind == ErrorKind::Cancelled {
        logger.log_progress("job cancelled");
    } else {
        logger.log_error(&detail);
    }

    if let Some(scratch) = scratch {
        if options.retain_scratch_on_failure {
            logger.log_progress("retaining scratch for inspection");
        } else {
            let _ = scratch.cleanup().await;
        }
    }
}

/// The four stages with their fixed progress bands.
async fn drive(
    inner: &EngineInner,
    job_id: &JobId,
    input_text: &str,
    options: &JobOptions,
    scratch: &JobScratch,
    mut cancel: watch::Receiver<bool>,
) -> EngineResult<FinalVideo> {
    // Stage 1: analyze (0 -> 20).
    check_cancel(&cancel)?;
    inner.publish_progress(job_id, Stage::Analyze, 0, "analyzing text");
    let outcome = inner.analyzer.analyze(input_text, options, &mut cancel).await?;
    for warning in &outcome.warnings {
        inner.publish_progress(job_id, Stage::Analyze, PCT_ANALYZED, warning);
    }
    inner.publish_progress(
        job_id,
        Stage::Analyze,
        PCT_ANALYZED,
        &format!(
            "analysis complete: {} characters, {} scenes",
            outcome.analyzed.characters.len(),
            outcome.analyzed.scene_count()
        ),
    );

    // Stage 2: storyboard (20 -> 30).
    check_cancel(&cancel)?;
    let storyboard = build_storyboard(&outcome.analyzed, options);
    inner.publish_progress(
        job_id,
        Stage::Storyboard,
        PCT_STORYBOARDED,
        &format!("storyboard ready: {} scenes", storyboard.scene_count()),
    );

    // Stage 3: render (30 -> 70, linear in scenes).
    check_cancel(&cancel)?;
    let rendered = inner
        .renderer
        .render(&storyboard, scratch, options, &cancel, |done, total| {
            inner.publish_progress(
                job_id,
                Stage::Render,
                render_progress(done, total),
                &format!("rendered scene {}/{}", done, total),
            );
        })
        .await?;

    // Stage 4: compose (70 -> 100).
    check_cancel(&cancel)?;
    inner.publish_progress(job_id, Stage::Compose, PCT_RENDERED, "composing video");
    let video = inner.composer.compose(&rendered, scratch, &cancel).await?;
    inner.publish_progress(job_id, Stage::Done, PCT_DONE, "video ready");

    Ok(video)
}

fn check_cancel(cancel: &watch::Receiver<bool>) -> EngineResult<()> {
    if *cancel.borrow() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Map scenes completed onto the stage-3 band.
fn render_progress(done: usize, total: usize) -> u8 {
    let total = total.max(1);
    let span = (PCT_RENDERED - PCT_STORYBOARDED) as f64;
    PCT_STORYBOARDED + ((done as f64 / total as f64) * span).round() as u8
}
