//! Downstream processing contracts.
//!
//! The queue hands each quiet conversation batch to a [`Processor`]. The
//! guarded chat pipeline is one implementation; it delegates reply
//! generation to a [`Responder`] such as the HTTP chat backend.

pub mod backend;

use async_trait::async_trait;

use crate::core::event::QueuedEvent;
use crate::error::Result;

pub use backend::BackendResponder;

/// Consumes one ordered batch of a single conversation.
///
/// `Ok(true)` removes the batch from the store. `Ok(false)`, `Err` and
/// panics all count as a failed attempt and the batch stays queued, so
/// implementations must tolerate seeing the same batch again.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, batch: &[QueuedEvent]) -> Result<bool>;
}

/// Produces the automated reply for a batch.
#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, batch: &[QueuedEvent]) -> Result<String>;
}
