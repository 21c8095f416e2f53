//! Regeneration orchestration.
//!
//! Settle signals are routed to a per-path lane task, so signals for one
//! record are processed in arrival order while distinct records regenerate
//! concurrently. A semaphore bounds how many regenerations run at once.
//!
//! Supersession: when a new settle signal arrives for a path whose
//! regeneration is still in flight, the in-flight attempt future is dropped
//! and a fresh attempt starts against the latest file content. A dropped
//! attempt can never reach the rename step of the atomic publish, so the
//! published artifacts always reflect the most recent attempt that
//! completed validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::events::{EventBroadcaster, FailureKind, PipelineEvent};
use crate::layout::{ArtifactLayout, record_stem};
use crate::publish::{PublishError, encode_png, publish_bytes};
use crate::record::{DetectionRecord, ValidationError, validate};
use crate::render::render;

/// Errors from a single regeneration attempt.
///
/// All of these are recovered locally: they abort the attempt for one
/// record and are reported on the event bus, never crashing the watcher or
/// affecting other records.
#[derive(Error, Debug)]
pub enum RegenError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot read detection record {path}: {source}")]
    RecordUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not match *_detections.json")]
    UnrecognizedRecordName { path: PathBuf },

    #[error("source image missing: {path}")]
    SourceImageMissing { path: PathBuf },

    #[error("cannot decode source image {path}: {source}")]
    SourceImageUnreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to publish artifact: {0}")]
    Publish(#[from] PublishError),

    #[error("regeneration worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl RegenError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RegenError::Validation(ValidationError::MalformedJson(_)) => FailureKind::MalformedJson,
            RegenError::Validation(ValidationError::SchemaViolation { .. }) => {
                FailureKind::SchemaViolation
            }
            RegenError::Validation(ValidationError::OutOfRangeValue { .. }) => {
                FailureKind::OutOfRangeValue
            }
            RegenError::RecordUnreadable { .. } => FailureKind::RecordUnreadable,
            RegenError::UnrecognizedRecordName { .. } => FailureKind::SchemaViolation,
            RegenError::SourceImageMissing { .. } => FailureKind::SourceImageMissing,
            RegenError::SourceImageUnreadable { .. } => FailureKind::SourceImageUnreadable,
            RegenError::Publish(_) => FailureKind::WriteFailure,
            RegenError::Worker(_) => FailureKind::Internal,
        }
    }
}

/// Dispatches settle signals to per-path regeneration lanes.
#[derive(Clone)]
pub struct RegenOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    layout: ArtifactLayout,
    broadcaster: EventBroadcaster,
    workers: Semaphore,
    rewrite_records: bool,
    lanes: Mutex<HashMap<PathBuf, Lane>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    /// Replaced with a fresh token on shutdown so the orchestrator can
    /// serve another watch session afterwards.
    cancel: Mutex<CancellationToken>,
}

struct Lane {
    tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl RegenOrchestrator {
    pub fn new(layout: ArtifactLayout, broadcaster: EventBroadcaster, config: &WatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                layout,
                broadcaster,
                workers: Semaphore::new(config.workers.max(1)),
                rewrite_records: config.rewrite_records,
                lanes: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Queue a settle signal for `path`, spawning its lane if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, path: PathBuf) {
        let mut lanes = self.inner.lanes.lock();
        let lane = lanes
            .entry(path.clone())
            .or_insert_with(|| self.spawn_lane(path));
        if lane.tx.send(()).is_err() {
            crate::debug_event!("regen", "lane closed, signal dropped");
        }
    }

    /// Drop the lane for a deleted record. Any in-flight attempt for it is
    /// abandoned before its publish step.
    pub fn evict(&self, path: &Path) {
        let lane = self.inner.lanes.lock().remove(path);
        if let Some(lane) = lane {
            // Closing the channel makes the lane task drop its attempt and
            // exit; keep the handle so shutdown can await it.
            drop(lane.tx);
            self.inner.retired.lock().push(lane.handle);
            crate::debug_event!("regen", "lane evicted", "{}", path.display());
        }
    }

    /// Run one regeneration for `path` directly, bypassing lanes.
    ///
    /// Used by the one-shot CLI path; emits the same events as watched
    /// regenerations.
    pub async fn regenerate(&self, path: &Path) -> Result<(), RegenError> {
        self.inner.clone().attempt(path.to_path_buf()).await
    }

    /// Cancel all lanes and wait until no background activity remains.
    ///
    /// The orchestrator is reusable afterwards: new submissions spawn
    /// fresh lanes.
    pub async fn shutdown(&self) {
        {
            let mut cancel = self.inner.cancel.lock();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        {
            let mut lanes = self.inner.lanes.lock();
            handles.extend(lanes.drain().map(|(_, lane)| lane.handle));
        }
        handles.append(&mut self.inner.retired.lock());

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn spawn_lane(&self, path: PathBuf) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.inner.cancel.lock().clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(lane_loop(path, inner, cancel, rx));
        Lane { tx, handle }
    }
}

/// Per-path loop: one signal at a time, newest wins.
async fn lane_loop(
    path: PathBuf,
    inner: Arc<Inner>,
    cancel: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => return,
            signal = rx.recv() => signal,
        };
        if signal.is_none() {
            return;
        }
        // A burst that settled more than once collapses into one attempt.
        while rx.try_recv().is_ok() {}

        let mut attempt = Box::pin(Arc::clone(&inner).attempt(path.clone()));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut attempt => break,
                next = rx.recv() => match next {
                    Some(()) => {
                        // Newer settle supersedes the in-flight attempt.
                        crate::debug_event!("regen", "superseded", "{}", path.display());
                        while rx.try_recv().is_ok() {}
                        attempt = Box::pin(Arc::clone(&inner).attempt(path.clone()));
                    }
                    None => return,
                },
            }
        }
    }
}

impl Inner {
    /// One full regeneration attempt, with events and pool accounting.
    async fn attempt(self: Arc<Self>, path: PathBuf) -> Result<(), RegenError> {
        let Ok(_permit) = self.workers.acquire().await else {
            return Ok(());
        };

        self.broadcaster
            .send(PipelineEvent::RegenerationStarted { path: path.clone() });

        match self.run(&path).await {
            Ok(()) => {
                crate::log_event!("regen", "succeeded", "{}", path.display());
                self.broadcaster
                    .send(PipelineEvent::RegenerationSucceeded { path });
                Ok(())
            }
            Err(e) => {
                tracing::error!("[regen] failed for {}: {e}", path.display());
                self.broadcaster.send(PipelineEvent::RegenerationFailed {
                    path,
                    kind: e.kind(),
                });
                Err(e)
            }
        }
    }

    /// Read, validate, render, and publish. Any error leaves previously
    /// published artifacts untouched.
    async fn run(&self, path: &Path) -> Result<(), RegenError> {
        let stem = record_stem(path)
            .ok_or_else(|| RegenError::UnrecognizedRecordName {
                path: path.to_path_buf(),
            })?
            .to_string();

        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| RegenError::RecordUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let record = validate(&raw)?;

        let source = load_source_image(&record.image_path).await?;

        type Rendered = (Vec<u8>, Vec<u8>, DetectionRecord);
        let (labeled_png, filtered_png, mut record) =
            tokio::task::spawn_blocking(move || -> Result<Rendered, PublishError> {
                let artifacts = render(&source, &record);
                Ok((
                    encode_png(&artifacts.labeled)?,
                    encode_png(&artifacts.filtered)?,
                    record,
                ))
            })
            .await??;

        // Publish order is fixed: labeled, filtered, then (optionally) the
        // record itself, so a crash leaves earlier artifacts valid.
        self.publish_with_retry(&self.layout.labeled_path(&stem), &labeled_png)?;
        self.publish_with_retry(&self.layout.filtered_path(&stem), &filtered_png)?;

        if self.rewrite_records {
            record.output_files.labeled_image = Some(self.layout.labeled_path(&stem));
            record.output_files.filtered_image = Some(self.layout.filtered_path(&stem));
            let canonical = serde_json::to_vec_pretty(&record).map_err(|e| {
                RegenError::Validation(ValidationError::SchemaViolation {
                    reason: e.to_string(),
                })
            })?;
            // Only rewrite when the bytes actually change, so the resulting
            // watch event converges instead of looping.
            if canonical != raw {
                self.publish_with_retry(path, &canonical)?;
            }
        }

        Ok(())
    }

    /// A failed publish is retried once immediately, then reported.
    fn publish_with_retry(&self, dest: &Path, bytes: &[u8]) -> Result<(), RegenError> {
        if let Err(first) = publish_bytes(dest, bytes) {
            tracing::warn!(
                "[regen] publish failed for {}, retrying once: {first}",
                dest.display()
            );
            publish_bytes(dest, bytes)?;
        }
        Ok(())
    }
}

async fn load_source_image(path: &Path) -> Result<RgbImage, RegenError> {
    if !path.exists() {
        return Err(RegenError::SourceImageMissing {
            path: path.to_path_buf(),
        });
    }
    let owned = path.to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || image::open(&owned)).await?;
    decoded
        .map(|img| img.to_rgb8())
        .map_err(|source| RegenError::SourceImageUnreadable {
            path: path.to_path_buf(),
            source,
        })
}
