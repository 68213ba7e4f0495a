//! Per-job scratch filesystem for the StoryReel pipeline.
//!
//! Each job owns a workspace at `<scratch_base>/<job_id>/` with
//! `images/`, `audio/`, and `temp/` subtrees. All writes are atomic
//! (temp file + rename within the same subtree); the final video is
//! promoted out of the scratch area before cleanup.

pub mod error;
pub mod fs;
pub mod scratch;

pub use error::{StorageError, StorageResult};
pub use scratch::{JobScratch, ScratchStore};
