//! Bounded dispatch pool with at most one task per conversation.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::core::event::{ConversationGroup, ConversationKey};
use crate::processor::Processor;

/// An admitted batch and the task running it.
struct DispatchTask {
    group: ConversationGroup,
    admitted_at: f64,
    handle: JoinHandle<bool>,
}

/// A finished task, observed by the consumer loop.
#[derive(Debug)]
pub struct Completion {
    pub group: ConversationGroup,
    pub admitted_at: f64,
    pub success: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Admit {
    Submitted,
    /// A task for this conversation is still running.
    Busy,
    /// Every worker slot is taken.
    Full,
}

pub struct DispatchPool {
    capacity: usize,
    processor: Arc<dyn Processor>,
    in_flight: HashMap<ConversationKey, DispatchTask>,
}

impl DispatchPool {
    pub fn new(capacity: usize, processor: Arc<dyn Processor>) -> Self {
        Self {
            capacity: capacity.max(1),
            processor,
            in_flight: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.capacity
    }

    /// Spawn a task for `group` unless its conversation is busy or the
    /// pool is full. Must be called inside a tokio runtime.
    pub fn submit(&mut self, group: ConversationGroup, now: f64) -> Admit {
        if self.is_active(&group.key) {
            return Admit::Busy;
        }
        if !self.has_capacity() {
            return Admit::Full;
        }

        let processor = self.processor.clone();
        let batch = group.batch();
        let key = group.key.clone();
        let handle = tokio::spawn(async move {
            match processor.process(&batch).await {
                Ok(success) => success,
                Err(e) => {
                    tracing::warn!("Processing failed for {}: {}", key, e);
                    false
                }
            }
        });

        self.in_flight.insert(
            group.key.clone(),
            DispatchTask {
                group,
                admitted_at: now,
                handle,
            },
        );
        Admit::Submitted
    }

    /// Collect tasks that already finished. Never waits on a running task.
    pub async fn reap(&mut self) -> Vec<Completion> {
        let finished: Vec<ConversationKey> = self
            .in_flight
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        let mut completions = Vec::with_capacity(finished.len());
        for key in finished {
            if let Some(task) = self.in_flight.remove(&key) {
                completions.push(Self::complete(task).await);
            }
        }
        completions
    }

    /// Wait for every in-flight task. Used on shutdown.
    pub async fn drain(&mut self) -> Vec<Completion> {
        let mut completions = Vec::with_capacity(self.in_flight.len());
        for (_, task) in self.in_flight.drain() {
            completions.push(Self::complete(task).await);
        }
        completions
    }

    /// Forget the task for `key` without waiting; a running task is left
    /// detached and its result is ignored.
    pub fn release(&mut self, key: &ConversationKey) -> bool {
        self.in_flight.remove(key).is_some()
    }

    async fn complete(task: DispatchTask) -> Completion {
        let success = match task.handle.await {
            Ok(success) => success,
            Err(e) => {
                tracing::error!("Dispatch task for {} panicked: {}", task.group.key, e);
                false
            }
        };
        Completion {
            group: task.group,
            admitted_at: task.admitted_at,
            success,
        }
    }
}
