//! Watch lifecycle and event routing.
//!
//! The supervisor owns the process-wide watch state: the `notify` watcher,
//! the set of watched directories, and the per-path debounce table. It is
//! an explicit object with `start`/`stop`, never a singleton; stopping it
//! tears down every lane and leaves no background activity behind.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::events::{EventBroadcaster, PipelineEvent};
use crate::layout::{ArtifactLayout, is_record_path, record_stem};
use crate::orchestrator::RegenOrchestrator;

use super::debouncer::Debouncer;
use super::error::WatchError;

/// How often the debounce table is polled for settled records.
const SETTLE_TICK: Duration = Duration::from_millis(100);

/// How often missing watch directories are re-checked.
const REARM_TICK: Duration = Duration::from_secs(2);

/// Owns the watch session over one or more record directories.
pub struct WatchSupervisor {
    layout: ArtifactLayout,
    orchestrator: RegenOrchestrator,
    broadcaster: EventBroadcaster,
    config: WatchConfig,
    running: Option<Running>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchSupervisor {
    pub fn new(
        layout: ArtifactLayout,
        orchestrator: RegenOrchestrator,
        broadcaster: EventBroadcaster,
        config: WatchConfig,
    ) -> Self {
        Self {
            layout,
            orchestrator,
            broadcaster,
            config,
            running: None,
        }
    }

    /// Begin watching the given directories (`<output_root>/json` when the
    /// list is empty).
    ///
    /// Fails with [`WatchError::AlreadyRunning`] if a session is active.
    /// Directories that do not exist yet are armed as soon as they appear.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, mut dirs: Vec<PathBuf>) -> Result<(), WatchError> {
        if self.running.is_some() {
            return Err(WatchError::AlreadyRunning);
        }

        if dirs.is_empty() {
            dirs.push(self.layout.json_dir());
        }

        let (tx, rx) = mpsc::channel(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        // Arm existing directories before returning so edits made right
        // after start() are never missed; missing ones are picked up by
        // the re-arm tick.
        let mut armed = HashSet::new();
        sync_watches(&mut watcher, &dirs, &mut armed);

        let cancel = CancellationToken::new();
        let event_loop = EventLoop {
            watcher,
            events: rx,
            debouncer: Debouncer::new(Duration::from_millis(self.config.debounce_ms)),
            dirs: dirs.clone(),
            armed,
            layout: self.layout.clone(),
            orchestrator: self.orchestrator.clone(),
            broadcaster: self.broadcaster.clone(),
            remove_stale: self.config.remove_stale_artifacts,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(event_loop.run());

        crate::log_event!("watcher", "started", "{} directories", dirs.len());
        self.broadcaster
            .send(PipelineEvent::WatcherStarted { dirs });
        self.running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Halt event delivery, cancel in-flight regenerations, and release
    /// watch handles. No background activity remains once this returns.
    ///
    /// Fails with [`WatchError::NotRunning`] if no session is active.
    pub async fn stop(&mut self) -> Result<(), WatchError> {
        let Running { cancel, handle } = self.running.take().ok_or(WatchError::NotRunning)?;

        cancel.cancel();
        let _ = handle.await;
        self.orchestrator.shutdown().await;

        crate::log_event!("watcher", "stopped");
        self.broadcaster.send(PipelineEvent::WatcherStopped);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

/// The dedicated control flow owning filesystem event delivery.
struct EventLoop {
    watcher: notify::RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
    debouncer: Debouncer,
    /// Directories this session was asked to watch.
    dirs: Vec<PathBuf>,
    /// Subset of `dirs` with a live watch registration.
    armed: HashSet<PathBuf>,
    layout: ArtifactLayout,
    orchestrator: RegenOrchestrator,
    broadcaster: EventBroadcaster,
    remove_stale: bool,
    cancel: CancellationToken,
}

impl EventLoop {
    async fn run(mut self) {
        let mut settle_tick = tokio::time::interval(SETTLE_TICK);
        settle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rearm_tick = tokio::time::interval(REARM_TICK);
        rearm_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(res) = self.events.recv() => {
                    match res {
                        Ok(event) => self.handle_event(event),
                        Err(e) => tracing::error!("[watcher] file watch error: {e}"),
                    }
                }

                _ = settle_tick.tick() => {
                    for path in self.debouncer.drain_settled() {
                        // Rename-style saves can surface as a modify of a
                        // path that no longer exists.
                        if path.exists() {
                            crate::debug_event!("watcher", "settled", "{}", path.display());
                            self.orchestrator.submit(path);
                        } else {
                            self.handle_removal(path);
                        }
                    }
                }

                _ = rearm_tick.tick() => self.rearm_watches(),
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    if is_record_path(&path) {
                        self.debouncer.touch(path);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    if is_record_path(&path) {
                        self.handle_removal(path);
                    } else if self.armed.remove(&path) {
                        // A watched directory went away; the re-arm tick
                        // picks it back up if it is recreated.
                        crate::log_event!("watcher", "directory removed", "{}", path.display());
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_removal(&mut self, path: PathBuf) {
        self.debouncer.forget(&path);
        self.orchestrator.evict(&path);

        if self.remove_stale {
            if let Some(stem) = record_stem(&path) {
                for artifact in [
                    self.layout.labeled_path(stem),
                    self.layout.filtered_path(stem),
                    self.layout.mask_path(stem),
                ] {
                    match std::fs::remove_file(&artifact) {
                        Ok(()) => {
                            crate::debug_event!(
                                "watcher",
                                "removed artifact",
                                "{}",
                                artifact.display()
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            tracing::warn!(
                                "[watcher] failed to remove {}: {e}",
                                artifact.display()
                            );
                        }
                    }
                }
            }
        }

        crate::log_event!("watcher", "record removed", "{}", path.display());
        self.broadcaster.send(PipelineEvent::RecordRemoved { path });
    }

    fn rearm_watches(&mut self) {
        sync_watches(&mut self.watcher, &self.dirs, &mut self.armed);
    }
}

/// Arm watches for directories that exist but are not yet registered, and
/// drop registrations for directories that vanished.
fn sync_watches(
    watcher: &mut notify::RecommendedWatcher,
    dirs: &[PathBuf],
    armed: &mut HashSet<PathBuf>,
) {
    for dir in dirs {
        let exists = dir.is_dir();
        let is_armed = armed.contains(dir);

        if exists && !is_armed {
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    crate::debug_event!("watcher", "watching", "{}", dir.display());
                    armed.insert(dir.clone());
                }
                Err(e) => {
                    tracing::warn!("[watcher] failed to watch {}: {e}", dir.display());
                }
            }
        } else if !exists && is_armed {
            let _ = watcher.unwatch(dir);
            armed.remove(dir);
            crate::log_event!("watcher", "directory removed", "{}", dir.display());
        }
    }
}
