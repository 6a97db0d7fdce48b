//! Pattern detection: turns a user's symptom and treatment history into
//! deduplicated alerts.
//!
//! - `windowing`: aligns symptom readings to treatment administrations
//! - `evaluator`: match counting, confidence, significance gate, window choice
//! - `synthesizer`: severity, summary and dedup key for each finding
//! - `orchestrator`: one recompute run per user, concurrent and cancellable
//! - `traits` / `store`: the event-store seam and its SQLite implementation

pub mod error;
pub mod evaluator;
pub mod orchestrator;
pub mod store;
pub mod synthesizer;
pub mod traits;
pub mod types;
pub mod windowing;

pub use error::{PatternError, StoreError};
pub use orchestrator::{CancelHandle, RecomputeOrchestrator};
pub use store::SqliteEventStore;
pub use traits::EventStore;
pub use types::*;
