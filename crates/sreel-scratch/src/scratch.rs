//! Deterministic per-job workspace layout.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use sreel_models::JobId;

use crate::error::{StorageError, StorageResult};
use crate::fs::{move_file, sync_dir};

/// Name of the promoted final video inside the videos directory.
const FINAL_VIDEO_NAME: &str = "final.mp4";

/// Factory for per-job scratch workspaces.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    scratch_base: PathBuf,
    videos_base: PathBuf,
}

impl ScratchStore {
    pub fn new(scratch_base: impl Into<PathBuf>, videos_base: impl Into<PathBuf>) -> Self {
        Self {
            scratch_base: scratch_base.into(),
            videos_base: videos_base.into(),
        }
    }

    /// Create (idempotently) and return the workspace for a job.
    pub async fn open(&self, job_id: &JobId) -> StorageResult<JobScratch> {
        let root = self.scratch_base.join(job_id.as_str());
        for sub in ["images", "audio", "temp"] {
            fs::create_dir_all(root.join(sub)).await?;
        }
        debug!(job_id = %job_id, root = %root.display(), "opened job scratch");
        Ok(JobScratch {
            job_id: job_id.clone(),
            root,
            videos_base: self.videos_base.clone(),
        })
    }

    pub fn videos_base(&self) -> &Path {
        &self.videos_base
    }
}

/// One job's workspace: `<base>/<job_id>/{images,audio,temp}/`.
///
/// Owned exclusively by the job that opened it.
#[derive(Debug)]
pub struct JobScratch {
    job_id: JobId,
    root: PathBuf,
    videos_base: PathBuf,
}

impl JobScratch {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Absolute path for a file in `temp/` without creating it.
    ///
    /// Used for subprocess outputs that are written by the media tool
    /// rather than through `save_temp`.
    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.temp_dir().join(name)
    }

    /// Atomically write an image blob; returns its absolute path.
    pub async fn save_image(&self, bytes: &[u8], name: &str) -> StorageResult<PathBuf> {
        self.save_in(&self.images_dir(), bytes, name).await
    }

    /// Atomically write an audio blob; returns its absolute path.
    pub async fn save_audio(&self, bytes: &[u8], name: &str) -> StorageResult<PathBuf> {
        self.save_in(&self.audio_dir(), bytes, name).await
    }

    /// Atomically write a temp blob; returns its absolute path.
    pub async fn save_temp(&self, bytes: &[u8], name: &str) -> StorageResult<PathBuf> {
        self.save_in(&self.temp_dir(), bytes, name).await
    }

    /// Write-to-temp + rename within the target subtree.
    async fn save_in(&self, dir: &Path, bytes: &[u8], name: &str) -> StorageResult<PathBuf> {
        let tmp = dir.join(format!(".{}.tmp", name));
        let dst = dir.join(name);

        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &dst).await {
            let _ = std::fs::remove_file(&tmp);
            return Err(StorageError::from(e));
        }
        Ok(dst)
    }

    /// True if `path` lives inside this job's scratch tree.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Move the final video out of the scratch area.
    ///
    /// Lands at `<videos_base>/<job_id>/final.mp4`; the containing
    /// directory is fsynced so the promotion survives a crash.
    pub async fn promote(&self, path: &Path) -> StorageResult<PathBuf> {
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        if !self.contains(path) {
            return Err(StorageError::OutsideScratch(path.to_path_buf()));
        }

        let dest_dir = self.videos_base.join(self.job_id.as_str());
        let dest = dest_dir.join(FINAL_VIDEO_NAME);
        move_file(path, &dest).await?;
        sync_dir(&dest_dir)?;

        debug!(job_id = %self.job_id, dest = %dest.display(), "promoted final video");
        Ok(dest)
    }

    /// Remove the scratch tree. Tolerates partial or missing trees.
    pub async fn cleanup(&self) -> StorageResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(job_id = %self.job_id, "scratch cleanup failed: {}", e);
                Err(StorageError::from(e))
            }
        }
    }
}
