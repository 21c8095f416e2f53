//! Watch session behavior: lifecycle misuse, debounce coalescing,
//! record deletion, and re-arming of recreated directories.

use std::path::PathBuf;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use thermowatch::config::WatchConfig;
use thermowatch::events::PipelineEvent;
use thermowatch::watcher::WatchError;
use thermowatch::{ArtifactLayout, EventBroadcaster, RegenOrchestrator, WatchSupervisor};

struct Session {
    _dir: TempDir,
    layout: ArtifactLayout,
    image_path: PathBuf,
    supervisor: WatchSupervisor,
    events: broadcast::Receiver<PipelineEvent>,
}

fn session(config: WatchConfig) -> Session {
    let dir = TempDir::new().unwrap();
    let layout = ArtifactLayout::new(dir.path().join("out"));
    layout.ensure_dirs().unwrap();

    let image_path = dir.path().join("tower3.png");
    RgbImage::from_pixel(64, 48, Rgb([120, 60, 30]))
        .save(&image_path)
        .unwrap();

    let broadcaster = EventBroadcaster::new(256);
    let orchestrator = RegenOrchestrator::new(layout.clone(), broadcaster.clone(), &config);
    let supervisor = WatchSupervisor::new(
        layout.clone(),
        orchestrator,
        broadcaster.clone(),
        config,
    );
    let events = broadcaster.subscribe();

    Session {
        _dir: dir,
        layout,
        image_path,
        supervisor,
        events,
    }
}

fn test_config() -> WatchConfig {
    WatchConfig {
        debounce_ms: 200,
        workers: 2,
        remove_stale_artifacts: false,
        rewrite_records: false,
    }
}

fn write_record(session: &Session, stem: &str, confidence: f64) {
    let json = serde_json::json!({
        "image_filename": "tower3.png",
        "image_path": session.image_path,
        "processing_timestamp": "2025-11-02 14:31:07",
        "classification": "Wire Overload",
        "total_detections": 1,
        "output_files": {},
        "detections": [{
            "id": 1,
            "type": "WireOverload",
            "confidence": confidence,
            "bbox": {"x": 4, "y": 4, "width": 20, "height": 16},
            "center": {"x": 0, "y": 0}
        }]
    });
    std::fs::write(
        session.layout.record_path(stem),
        serde_json::to_vec_pretty(&json).unwrap(),
    )
    .unwrap();
}

/// Collect events until the bus stays quiet for `quiet`.
async fn drain_until_quiet(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    quiet: Duration,
) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(received) = timeout(quiet, rx.recv()).await {
        match received {
            Ok(event) => events.push(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    events
}

fn count_started(events: &[PipelineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::RegenerationStarted { .. }))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_misuse_is_an_error() {
    let mut session = session(test_config());

    session.supervisor.start(Vec::new()).unwrap();
    assert!(session.supervisor.is_running());
    assert!(matches!(
        session.supervisor.start(Vec::new()),
        Err(WatchError::AlreadyRunning)
    ));

    session.supervisor.stop().await.unwrap();
    assert!(!session.supervisor.is_running());
    assert!(matches!(
        session.supervisor.stop().await,
        Err(WatchError::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_edits_coalesces_into_one_regeneration() {
    let mut session = session(test_config());
    session.supervisor.start(Vec::new()).unwrap();

    // five rapid saves, well inside the 200ms quiet window
    for i in 0..5 {
        write_record(&session, "tower3", 0.5 + 0.01 * i as f64);
    }

    let events = drain_until_quiet(&mut session.events, Duration::from_secs(2)).await;
    assert_eq!(
        count_started(&events),
        1,
        "expected one coalesced regeneration in {events:?}"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::RegenerationSucceeded { .. }))
    );
    assert!(session.layout.labeled_path("tower3").exists());
    assert!(session.layout.filtered_path("tower3").exists());

    session.supervisor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_edit_triggers_second_regeneration_only() {
    let mut session = session(test_config());
    session.supervisor.start(Vec::new()).unwrap();

    write_record(&session, "tower3", 0.9);
    let events = drain_until_quiet(&mut session.events, Duration::from_secs(2)).await;
    assert_eq!(count_started(&events), 1);
    let first_labeled = std::fs::read(session.layout.labeled_path("tower3")).unwrap();

    // edit only the confidence; exactly one more regeneration follows
    write_record(&session, "tower3", 0.3);
    let events = drain_until_quiet(&mut session.events, Duration::from_secs(2)).await;
    assert_eq!(count_started(&events), 1);

    // overlay text changed, provenance did not
    let second_labeled = std::fs::read(session.layout.labeled_path("tower3")).unwrap();
    assert_ne!(second_labeled, first_labeled);
    let raw = std::fs::read(session.layout.record_path("tower3")).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["processing_timestamp"], "2025-11-02 14:31:07");

    session.supervisor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_a_record_evicts_it_and_removes_stale_artifacts() {
    let mut session = session(WatchConfig {
        remove_stale_artifacts: true,
        ..test_config()
    });
    session.supervisor.start(Vec::new()).unwrap();

    write_record(&session, "tower3", 0.7);
    let events = drain_until_quiet(&mut session.events, Duration::from_secs(2)).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::RegenerationSucceeded { .. }))
    );
    assert!(session.layout.labeled_path("tower3").exists());

    std::fs::remove_file(session.layout.record_path("tower3")).unwrap();
    let events = drain_until_quiet(&mut session.events, Duration::from_secs(2)).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::RecordRemoved { .. })),
        "no removal event in {events:?}"
    );
    assert!(!session.layout.labeled_path("tower3").exists());
    assert!(!session.layout.filtered_path("tower3").exists());

    session.supervisor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recreated_directory_is_rearmed() {
    let mut session = session(test_config());

    // start watching a directory that does not exist yet
    let json_dir = session.layout.json_dir();
    std::fs::remove_dir_all(&json_dir).unwrap();
    session.supervisor.start(Vec::new()).unwrap();

    // recreate it and drop a record in; the re-arm tick must pick it up
    std::fs::create_dir_all(&json_dir).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    write_record(&session, "tower3", 0.6);

    let events = drain_until_quiet(&mut session.events, Duration::from_secs(3)).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::RegenerationSucceeded { .. })),
        "watch was not re-armed: {events:?}"
    );

    session.supervisor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_emits_watcher_stopped_and_quiesces() {
    let mut session = session(test_config());
    session.supervisor.start(Vec::new()).unwrap();

    let started = drain_until_quiet(&mut session.events, Duration::from_millis(300)).await;
    assert!(
        started
            .iter()
            .any(|e| matches!(e, PipelineEvent::WatcherStarted { .. }))
    );

    session.supervisor.stop().await.unwrap();
    let events = drain_until_quiet(&mut session.events, Duration::from_millis(300)).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::WatcherStopped))
    );

    // writes after stop trigger nothing
    write_record(&session, "tower3", 0.5);
    let events = drain_until_quiet(&mut session.events, Duration::from_secs(1)).await;
    assert_eq!(count_started(&events), 0);
}
