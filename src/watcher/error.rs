//! Error types for the watch subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher lifecycle and registration.
///
/// `AlreadyRunning` and `NotRunning` indicate lifecycle misuse and are
/// surfaced directly to the caller of `start`/`stop`; everything observed
/// while watching is recovered internally and reported on the event bus.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("watcher is not running")]
    NotRunning,

    #[error("failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
