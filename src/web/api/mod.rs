//! API endpoints module.

pub mod events;
pub mod queue;

use crate::core::ingest::Ingestor;

pub use events::ingest_event;
pub use queue::queue_stats;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
}
