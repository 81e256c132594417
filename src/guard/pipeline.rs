//! Chat pipeline processor gated by the cooldown guard.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::event::{QueuedEvent, SenderRole};
use crate::error::Result;
use crate::processor::{Processor, Responder};

use super::cooldown::{CooldownGuard, Screening};

/// What the pipeline did with a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The responder produced a reply.
    Automated(String),
    /// A human operator is active; the responder was not called.
    Advisory(String),
    /// Nothing left after echo suppression.
    Skipped,
}

pub struct GuardedProcessor<R> {
    guard: Arc<CooldownGuard>,
    responder: R,
    clock: Arc<dyn Clock>,
    advisory: String,
}

impl<R: Responder> GuardedProcessor<R> {
    pub fn new(
        guard: Arc<CooldownGuard>,
        responder: R,
        clock: Arc<dyn Clock>,
        advisory: impl Into<String>,
    ) -> Self {
        Self {
            guard,
            responder,
            clock,
            advisory: advisory.into(),
        }
    }

    pub async fn handle(&self, batch: &[QueuedEvent]) -> Result<Reply> {
        let pruned = self.guard.prune_idle(self.clock.now());
        if pruned > 0 {
            tracing::debug!("Dropped guard state for {} idle conversations", pruned);
        }

        let accepted: Vec<QueuedEvent> = batch
            .iter()
            .filter(|e| self.guard.screen(e) == Screening::Accept)
            .cloned()
            .collect();

        // Only human messages that survived echo screening pause automation.
        for event in accepted.iter().filter(|e| e.sender_role == SenderRole::HumanOperator) {
            self.guard
                .note_human_activity(&event.conversation_key, event.timestamp());
        }

        let Some(last) = accepted.last() else {
            return Ok(Reply::Skipped);
        };
        let key = &last.conversation_key;

        if last.sender_role == SenderRole::HumanOperator
            || self.guard.cooldown_active(key, last.timestamp())
        {
            tracing::info!("Human operator active in {}, automated reply paused", key);
            return Ok(Reply::Advisory(self.advisory.clone()));
        }

        let reply = self.responder.respond(&accepted).await?;
        self.guard
            .record_automated_reply(key, &reply, self.clock.now());
        tracing::info!(
            "{} replied to {} ({} events, {} chars)",
            self.responder.name(),
            key,
            accepted.len(),
            reply.len()
        );
        Ok(Reply::Automated(reply))
    }
}

#[async_trait]
impl<R: Responder> Processor for GuardedProcessor<R> {
    async fn process(&self, batch: &[QueuedEvent]) -> Result<bool> {
        self.handle(batch).await.map(|_| true)
    }
}
