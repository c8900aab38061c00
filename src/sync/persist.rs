use crate::error::SyncError;
use crate::sync::config::{BackoffKind, MAX_BATCH_SIZE, RetryConfig};
use crate::sync::context::RequestContext;
use crate::sync::model::ArchiveRecord;
use crate::sync::store::ArchiveLedger;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Delay schedule between attempts to drain unprocessed items.
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    delay_ms: u64,
    max_delay_ms: u64,
}

impl Backoff {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            kind: cfg.backoff,
            delay_ms: cfg.retry_delay_ms,
            max_delay_ms: cfg.retry_max_delay_ms,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => Duration::from_millis(self.delay_ms),
            BackoffKind::Exponential => {
                let base = self
                    .delay_ms
                    .saturating_mul(1u64 << retry.saturating_sub(1).min(20))
                    .min(self.max_delay_ms);
                let jitter = rand::random::<u64>() % base.max(1);
                Duration::from_millis(base.saturating_add(jitter).min(self.max_delay_ms))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub persisted: usize,
    pub batches: usize,
    pub retries: usize,
}

/// Writes records in bounded batches and resubmits only what the store hands back.
pub struct BatchPersistor<'a> {
    ledger: &'a dyn ArchiveLedger,
    batch_size: usize,
    retry: RetryConfig,
}

impl<'a> BatchPersistor<'a> {
    pub fn new(ledger: &'a dyn ArchiveLedger, batch_size: usize, retry: RetryConfig) -> Self {
        Self {
            ledger,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            retry,
        }
    }

    pub fn persist(
        &self,
        ctx: &RequestContext,
        records: &[ArchiveRecord],
    ) -> Result<PersistOutcome, SyncError> {
        let _span = ctx.span().enter();
        let mut outcome = PersistOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let batches = records.chunks(self.batch_size).collect::<Vec<_>>();
        info!(
            missing_archives = records.len(),
            batches = batches.len(),
            "persisting missing archives in batches"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            outcome.retries += self.persist_batch(index + 1, batch)?;
            outcome.batches += 1;
            outcome.persisted += batch.len();
        }

        info!(persisted_archives = outcome.persisted, "missing archives persisted");
        Ok(outcome)
    }

    /// Returns the number of retries the batch needed.
    fn persist_batch(&self, batch_number: usize, batch: &[ArchiveRecord]) -> Result<usize, SyncError> {
        let backoff = Backoff::from_config(&self.retry);
        let budget = Duration::from_millis(self.retry.max_elapsed_ms);
        let started = Instant::now();
        let mut pending = batch.to_vec();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let unprocessed = self.ledger.batch_write(&pending).map_err(|err| {
                error!(batch_number, batch_size = batch.len(), error = %format!("{err:#}"), "batch write failed");
                SyncError::persistence(&err)
            })?;
            if unprocessed.is_empty() {
                return Ok(attempts - 1);
            }

            if attempts >= self.retry.max_attempts {
                error!(batch_number, attempts, unprocessed = unprocessed.len(), "retry attempts exhausted");
                return Err(SyncError::Persistence(format!(
                    "{} archive records still unprocessed after {attempts} attempts",
                    unprocessed.len()
                )));
            }
            let delay = backoff.delay(u32::try_from(attempts).unwrap_or(u32::MAX));
            let resume_at = started.elapsed().checked_add(delay);
            if resume_at.is_none_or(|at| at > budget) {
                error!(batch_number, attempts, unprocessed = unprocessed.len(), "retry time budget exhausted");
                return Err(SyncError::Persistence(format!(
                    "{} archive records still unprocessed after {}ms",
                    unprocessed.len(),
                    started.elapsed().as_millis()
                )));
            }

            warn!(
                batch_number,
                attempt = attempts,
                unprocessed = unprocessed.len(),
                delay_ms = delay.as_millis() as u64,
                "store left items unprocessed, retrying the remainder"
            );
            thread::sleep(delay);
            pending = unprocessed;
        }
    }
}
