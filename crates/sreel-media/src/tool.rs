//! The media capability used by the composition stage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::concat::write_concat_list;
use crate::error::{MediaError, MediaResult};
use crate::probe::{self, MediaInfo};

/// Fixed codec settings applied to every clip, so concat inputs stay
/// stream-copy compatible.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub tune: String,
    pub pix_fmt: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub fps: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            tune: "stillimage".to_string(),
            pix_fmt: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            fps: 24,
        }
    }
}

/// Command-shaped capability over the media tool.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Mux a still image with an audio track into a clip; the clip
    /// ends with the audio.
    async fn mux_still(&self, image: &Path, audio: &Path, out: &Path) -> MediaResult<()>;

    /// Mux a still image with a silent audio bed of `duration` seconds.
    async fn mux_still_silent(&self, image: &Path, duration: f64, out: &Path) -> MediaResult<()>;

    /// Stream-copy concatenate clips, in order, into `out`.
    async fn concat(&self, inputs: &[PathBuf], out: &Path) -> MediaResult<()>;

    /// Measured duration of a media file, seconds.
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64>;

    /// Duration and byte size of a media file.
    async fn probe_info(&self, path: &Path) -> MediaResult<MediaInfo>;
}

/// Production implementation shelling out to ffmpeg/ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTool {
    settings: EncodeSettings,
    timeout_secs: Option<u64>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegTool {
    pub fn new(settings: EncodeSettings) -> Self {
        Self {
            settings,
            timeout_secs: None,
            cancel_rx: None,
        }
    }

    /// Per-operation subprocess timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Cancellation signal propagated to running subprocesses.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        runner
    }

    fn clip_codec_args(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.video_codec(self.settings.video_codec.as_str())
            .output_arg("-tune")
            .output_arg(self.settings.tune.as_str())
            .output_arg("-pix_fmt")
            .output_arg(self.settings.pix_fmt.as_str())
            .output_arg("-r")
            .output_arg(self.settings.fps.to_string())
            .audio_codec(self.settings.audio_codec.as_str())
            .output_arg("-b:a")
            .output_arg(self.settings.audio_bitrate.as_str())
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn mux_still(&self, image: &Path, audio: &Path, out: &Path) -> MediaResult<()> {
        debug!(image = %image.display(), audio = %audio.display(), "muxing still clip");
        let cmd = FfmpegCommand::new(out).looped_image(image).input(audio);
        let cmd = self.clip_codec_args(cmd).shortest();
        self.runner().run(&cmd).await
    }

    async fn mux_still_silent(&self, image: &Path, duration: f64, out: &Path) -> MediaResult<()> {
        debug!(image = %image.display(), duration, "muxing silent clip");
        let cmd = FfmpegCommand::new(out)
            .looped_image(image)
            .lavfi("anullsrc=r=44100:cl=stereo");
        let cmd = self.clip_codec_args(cmd).duration(duration);
        self.runner().run(&cmd).await
    }

    async fn concat(&self, inputs: &[PathBuf], out: &Path) -> MediaResult<()> {
        if inputs.is_empty() {
            return Err(MediaError::internal("concat called with no inputs"));
        }
        debug!(count = inputs.len(), out = %out.display(), "stream-copy concat");

        let list_path = out.with_extension("concat.txt");
        write_concat_list(inputs, &list_path).await?;

        let cmd = FfmpegCommand::new(out)
            .input_with_args(
                ["-f", "concat", "-safe", "0"],
                list_path.as_os_str().to_os_string(),
            )
            .stream_copy();
        let result = self.runner().run(&cmd).await;

        // The list file is only needed for the invocation.
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        probe::probe_duration(path).await
    }

    async fn probe_info(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe::probe_media(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_settings_default() {
        let s = EncodeSettings::default();
        assert_eq!(s.video_codec, "libx264");
        assert_eq!(s.tune, "stillimage");
        assert_eq!(s.pix_fmt, "yuv420p");
        assert_eq!(s.audio_codec, "aac");
    }

    #[tokio::test]
    async fn test_concat_rejects_empty_inputs() {
        let tool = FfmpegTool::default();
        let err = tool
            .concat(&[], Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Internal(_)));
    }
}
