//! Reactive watching of detection records.
//!
//! Raw filesystem events flow into a per-path debouncer; once a record has
//! been quiet for the configured period it is handed to the regeneration
//! orchestrator as a settle signal.
//!
//! # Architecture
//!
//! ```text
//! WatchSupervisor
//!   - Single notify::RecommendedWatcher over the record directories
//!   - Debouncer keyed by record path
//!   - Routes settle signals to the RegenOrchestrator
//!   - Re-arms watches when a deleted directory reappears
//! ```

mod debouncer;
mod error;
mod supervisor;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use supervisor::WatchSupervisor;
