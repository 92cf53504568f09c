//! Typed errors for the boundaries that can actually fail.
//!
//! Most outcomes described informally as "errors" in the learning/prediction
//! path are not constructed here at all — privacy rejection, cap eviction,
//! and parse failure are `bool`/`Option::None`, never a `PscueError`. This
//! enum exists for the persistence and filesystem boundaries where a real
//! I/O or consistency failure can occur.

use std::path::PathBuf;

/// Errors surfaced at the persistence and filesystem boundaries.
#[derive(Debug, thiserror::Error)]
pub enum PscueError {
    /// The store is temporarily unavailable (`SQLITE_BUSY` / `SQLITE_LOCKED`)
    /// and retries were exhausted. The caller should defer the delta to the
    /// next save cycle rather than treat this as data loss.
    #[error("store busy after {attempts} attempts: {detail}")]
    TransientStore { attempts: u32, detail: String },

    /// The store is corrupt or unreachable. The engine keeps running against
    /// in-memory state; the next save attempt tries again from scratch.
    #[error("store unavailable at {}: {detail}", path.display())]
    FatalStore { path: PathBuf, detail: String },

    /// A filesystem operation during a PCD walk hit a benign condition
    /// (permission denied, vanished entry). Callers skip the path.
    #[error("filesystem path {} skipped: {detail}", path.display())]
    FilesystemBenign { path: PathBuf, detail: String },

    /// An internal consistency check failed (e.g. baseline not set after
    /// load). Logged loudly; callers continue best-effort.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, PscueError>;
