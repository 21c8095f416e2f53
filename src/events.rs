//! Observability surface for the regeneration pipeline.
//!
//! Structured events are fanned out over a broadcast channel so tests,
//! status displays, and embedding applications can observe the pipeline
//! without being wired into it.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Structured pipeline events, one per watched path transition.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    WatcherStarted { dirs: Vec<PathBuf> },
    WatcherStopped,
    RegenerationStarted { path: PathBuf },
    RegenerationSucceeded { path: PathBuf },
    RegenerationFailed { path: PathBuf, kind: FailureKind },
    RecordRemoved { path: PathBuf },
}

/// Why a regeneration attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MalformedJson,
    SchemaViolation,
    OutOfRangeValue,
    RecordUnreadable,
    SourceImageMissing,
    SourceImageUnreadable,
    WriteFailure,
    Internal,
}

/// Fans pipeline events out to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: PipelineEvent) {
        match self.sender.send(event.clone()) {
            Ok(count) => {
                crate::debug_event!("broadcast", "sent", "{event:?} to {count} subscribers");
            }
            Err(_) => {
                // No receivers, this is fine
                crate::debug_event!("broadcast", "dropped", "no subscribers for {event:?}");
            }
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
