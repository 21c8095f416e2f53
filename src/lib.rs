pub mod config;
pub mod events;
pub mod infer;
pub mod layout;
pub mod logging;
pub mod orchestrator;
pub mod publish;
pub mod record;
pub mod render;
pub mod watcher;

pub use config::Settings;
pub use events::{EventBroadcaster, FailureKind, PipelineEvent};
pub use infer::{InferenceEngine, ScoreMap, ingest_image};
pub use layout::ArtifactLayout;
pub use orchestrator::{RegenError, RegenOrchestrator};
pub use record::{
    BoundingBox, Center, Detection, DetectionRecord, FaultKind, ValidationError, validate,
};
pub use render::{RenderedArtifacts, render};
pub use watcher::{Debouncer, WatchError, WatchSupervisor};
