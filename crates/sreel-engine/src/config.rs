//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Process-level engine configuration, read once at boot.
///
/// Per-job knobs live in `sreel_models::JobOptions`; this covers the
/// filesystem roots and the shared retry/subprocess tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of per-job scratch trees
    pub scratch_base: PathBuf,
    /// Root of promoted final videos
    pub videos_base: PathBuf,
    /// Timeout per media subprocess invocation
    pub mux_timeout: Duration,
    /// Base delay for external-call retries
    pub retry_base_delay: Duration,
    /// Cap on external-call retry delays
    pub retry_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_base: PathBuf::from("/tmp/storyreel/scratch"),
            videos_base: PathBuf::from("/tmp/storyreel/videos"),
            mux_timeout: Duration::from_secs(600),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            scratch_base: std::env::var("SREEL_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/storyreel/scratch")),
            videos_base: std::env::var("SREEL_VIDEOS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/storyreel/videos")),
            mux_timeout: Duration::from_secs(
                std::env::var("SREEL_MUX_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            retry_base_delay: Duration::from_millis(
                std::env::var("SREEL_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            retry_max_delay: Duration::from_secs(
                std::env::var("SREEL_RETRY_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
