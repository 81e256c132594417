//! Consumer loop - scan, group, admit, reap, retry/evict, sleep.
//!
//! The loop owns all dispatch bookkeeping (in-flight tasks and retry
//! counters). Single-flight holds only while exactly one consumer runs
//! against a given store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::QueueSettings;
use crate::core::clock::Clock;
use crate::core::event::{ConversationKey, EntryId};
use crate::core::pool::{Admit, Completion, DispatchPool};
use crate::core::retry::RetryTracker;
use crate::core::scheduler::{DebounceScheduler, ScanPlan};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::store::{EventStore, EvictionAudit, RawEntry};

/// What one cycle did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub scanned: usize,
    pub eligible: usize,
    pub pending: usize,
    pub admitted: usize,
    /// Eligible but their conversation already had a task running.
    pub busy: usize,
    /// Eligible but no worker slot was free.
    pub deferred: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub evicted: Vec<ConversationKey>,
}

pub struct Consumer {
    store: Arc<dyn EventStore>,
    scheduler: DebounceScheduler,
    pool: DispatchPool,
    retries: RetryTracker,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    audit: Option<Arc<dyn EvictionAudit>>,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn EventStore>,
        processor: Arc<dyn Processor>,
        clock: Arc<dyn Clock>,
        settings: &QueueSettings,
    ) -> Self {
        Self {
            store,
            scheduler: DebounceScheduler::new(settings.debounce_window_secs),
            pool: DispatchPool::new(settings.workers, processor),
            retries: RetryTracker::new(settings.max_retries),
            clock,
            poll_interval: settings.poll_interval(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn EvictionAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn pool(&self) -> &DispatchPool {
        &self.pool
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    /// Run one cycle without sleeping. Store failures are returned as-is.
    pub async fn tick(&mut self) -> Result<CycleReport> {
        let now = self.clock.now();
        let mut plan = self.scheduler.plan(self.scan().await?, now);

        let mut report = CycleReport {
            scanned: plan.scanned(),
            eligible: plan.eligible.len(),
            pending: plan.pending.len(),
            ..Default::default()
        };

        // A quiet group that cannot be decoded fails its attempt, so a
        // poisoned conversation is eventually evicted.
        for poisoned in &plan.poisoned {
            if poisoned.quiescent && !self.pool.is_active(&poisoned.key) {
                let attempt = self.retries.on_failure(&poisoned.key);
                tracing::warn!(
                    "Skipping {} this cycle, attempt {}: {}",
                    poisoned.key,
                    attempt,
                    poisoned.error
                );
                report.failed += 1;
            }
        }

        for group in std::mem::take(&mut plan.eligible) {
            let key = group.key.clone();
            let size = group.len();
            match self.pool.submit(group, now) {
                Admit::Submitted => {
                    tracing::info!("Dispatching {} events for {}", size, key);
                    report.admitted += 1;
                }
                Admit::Busy => {
                    tracing::debug!("{} already in flight, leaving events queued", key);
                    report.busy += 1;
                }
                Admit::Full => {
                    tracing::debug!("No free worker for {}, deferring", key);
                    report.deferred += 1;
                }
            }
        }

        let completions = self.pool.reap().await;
        self.apply_completions(completions, &mut report).await?;
        self.evict_exhausted(&plan, &mut report).await?;

        tracing::debug!(
            "Cycle: scanned={} eligible={} admitted={} in_flight={} succeeded={} failed={} evicted={}",
            report.scanned,
            report.eligible,
            report.admitted,
            self.pool.in_flight(),
            report.succeeded,
            report.failed,
            report.evicted.len()
        );
        Ok(report)
    }

    /// Wait for every in-flight task and record its outcome.
    pub async fn settle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let completions = self.pool.drain().await;
        self.apply_completions(completions, &mut report).await?;

        if !self.retries.due_for_eviction().is_empty() {
            let plan = self.scheduler.plan(self.scan().await?, self.clock.now());
            self.evict_exhausted(&plan, &mut report).await?;
        }
        Ok(report)
    }

    /// Loop until `shutdown` resolves, then settle in-flight work.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            "Consumer started: {} workers, debounce {}s, poll {:?}",
            self.pool.capacity(),
            self.scheduler.window(),
            self.poll_interval
        );

        loop {
            if let Err(e) = self.tick().await {
                tracing::error!("Consumer cycle failed: {}", e);
                return Err(e);
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        tracing::info!(
            "Consumer stopping, waiting for {} in-flight tasks",
            self.pool.in_flight()
        );
        self.settle().await?;
        Ok(())
    }

    // SQLite calls can wait on the busy timeout; keep them off the runtime.
    async fn scan(&self) -> Result<Vec<RawEntry>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.scan_all())
            .await
            .map_err(|e| Error::Store(format!("scan task failed: {}", e)))?
    }

    async fn remove(&self, ids: Vec<EntryId>) -> Result<usize> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.remove(&ids))
            .await
            .map_err(|e| Error::Store(format!("remove task failed: {}", e)))?
    }

    async fn apply_completions(
        &mut self,
        completions: Vec<Completion>,
        report: &mut CycleReport,
    ) -> Result<()> {
        for completion in completions {
            let key = &completion.group.key;
            if completion.success {
                let removed = self.remove(completion.group.entry_ids()).await?;
                self.retries.on_success(key);
                tracing::info!(
                    "Processed {} ({} events removed)",
                    key,
                    removed
                );
                report.succeeded += 1;
            } else {
                let attempt = self.retries.on_failure(key);
                tracing::warn!("Failed to process {}. Attempt {}.", key, attempt);
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn evict_exhausted(&mut self, plan: &ScanPlan, report: &mut CycleReport) -> Result<()> {
        for key in self.retries.due_for_eviction() {
            let attempts = self.retries.evict(&key);
            self.pool.release(&key);

            if let Some(audit) = self.audit.clone() {
                let entries = plan.entries_for(&key).to_vec();
                let audited_key = key.clone();
                let result = tokio::task::spawn_blocking(move || {
                    audit.record_eviction(&audited_key, attempts, &entries)
                })
                .await
                .map_err(|e| Error::Store(format!("audit task failed: {}", e)))
                .and_then(|r| r);
                if let Err(e) = result {
                    tracing::warn!("Failed to audit eviction of {}: {}", key, e);
                }
            }

            let removed = self.remove(plan.entry_ids_for(&key)).await?;
            tracing::error!(
                "{} failed {} times, discarding {} queued events",
                key,
                attempts,
                removed
            );
            report.evicted.push(key);
        }
        Ok(())
    }
}
