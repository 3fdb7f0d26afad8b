//! Ingestion scheduler.
//!
//! Drives the identity source into the store on a fixed interval. Cycles are strictly
//! sequential: a tick that comes due while a cycle is still running is skipped, not queued.
//! A failed cycle is recorded in the watermark and retried on the next tick; the loop
//! itself never exits on a remote or store error.

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use whitelist_core::IdentityAddress;
use whitelist_engine::is_eligible;

use super::source::{IdentitySource, RemoteIdentity, SourceError};
use crate::config::IngestionSettings;
use crate::storage::{IngestionCommit, StoreWriter};

/// How a cycle asks the source for identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionMode {
    /// One `fetch_all` call per cycle.
    Bulk,
    /// One `fetch_one` call per address, in fixed-size batches with a pause in between.
    PerAddress(Vec<IdentityAddress>),
}

/// Scheduler lifecycle, observable through [`IngestionScheduler::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// Remote calls in flight.
    Fetching,
    /// Writing the fetched batch.
    Reconciling,
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Records written and watermark advanced.
    Committed {
        /// Records written.
        updated: u64,
        /// Addresses that failed individually.
        failed: u64,
    },
    /// Nothing written; the error is in the watermark.
    Failed(String),
    /// Shutdown arrived before the batch was committed.
    Aborted,
}

struct FetchedBatch {
    identities: Vec<RemoteIdentity>,
    failures: Vec<(IdentityAddress, SourceError)>,
}

/// Periodic ingestion loop. Owns the store's only writer.
pub struct IngestionScheduler<S> {
    source: S,
    writer: StoreWriter,
    settings: IngestionSettings,
    mode: IngestionMode,
    state: watch::Sender<SchedulerState>,
    attempts: u64,
}

impl<S: IdentitySource> IngestionScheduler<S> {
    /// Create a scheduler.
    pub fn new(
        source: S,
        writer: StoreWriter,
        settings: IngestionSettings,
        mode: IngestionMode,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            source,
            writer,
            settings,
            mode,
            state,
            attempts: 0,
        }
    }

    /// Watch the scheduler state.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The first cycle starts immediately. Shutdown aborts an in-flight fetch; a batch that
    /// is already being written is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Ingestion scheduler starting (interval: {:?}, mode: {})",
            self.settings.poll_interval,
            match &self.mode {
                IngestionMode::Bulk => "bulk".to_string(),
                IngestionMode::PerAddress(list) => format!("per-address, {} addresses", list.len()),
            }
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            self.run_cycle(&mut shutdown).await;
        }

        info!("Ingestion scheduler stopped");

        Ok(())
    }

    /// Run exactly one cycle.
    pub async fn run_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        self.attempts += 1;
        let attempt = self.attempts;
        let started_at = Utc::now();

        if let Err(e) = self.writer.record_attempt(started_at).await {
            warn!(attempt, error = %format!("{:#}", e), "Store unavailable, skipping cycle");
            return CycleOutcome::Failed(e.to_string());
        }

        self.state.send_replace(SchedulerState::Fetching);
        debug!(attempt, "Fetching identities");

        let fetched = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => None,
            batch = self.fetch() => Some(batch),
        };

        let batch = match fetched {
            None => {
                info!(attempt, "Shutdown during fetch, discarding cycle");
                self.state.send_replace(SchedulerState::Idle);
                return CycleOutcome::Aborted;
            }
            Some(Err(e)) => {
                let outcome = self.fail(attempt, e.to_string(), 0).await;
                self.state.send_replace(SchedulerState::Idle);
                return outcome;
            }
            Some(Ok(batch)) => batch,
        };

        let failed = batch.failures.len() as u64;
        if batch.identities.is_empty() && failed > 0 {
            let message = format!("All {} addresses failed; {}", failed, first_failure(&batch.failures));
            let outcome = self.fail(attempt, message, failed).await;
            self.state.send_replace(SchedulerState::Idle);
            return outcome;
        }

        self.state.send_replace(SchedulerState::Reconciling);

        let last_error = (failed > 0).then(|| {
            format!(
                "{} of {} addresses failed; {}",
                failed,
                failed as usize + batch.identities.len(),
                first_failure(&batch.failures)
            )
        });
        let records: Vec<_> = batch
            .identities
            .into_iter()
            .map(|identity| identity.into_record(started_at))
            .collect();
        let commit = IngestionCommit {
            started_at,
            failed_count: failed,
            last_error,
        };

        let policy = self.settings.eligibility_policy();
        let eligible = records.iter().filter(|record| is_eligible(&policy, record)).count();

        let outcome = match self.writer.commit_ingestion(&records, &commit).await {
            Ok(updated) => {
                if failed > 0 {
                    warn!(attempt, updated, eligible, failed, "Ingestion cycle committed with failures");
                } else {
                    info!(attempt, updated, eligible, "Ingestion cycle committed");
                }
                CycleOutcome::Committed { updated, failed }
            }
            Err(e) => self.fail(attempt, format!("{:#}", e), failed).await,
        };

        self.state.send_replace(SchedulerState::Idle);
        outcome
    }

    async fn fail(&self, attempt: u64, message: String, failed: u64) -> CycleOutcome {
        warn!(attempt, failed, error = %message, "Ingestion cycle failed");

        if let Err(e) = self.writer.record_failure(&message, failed).await {
            warn!(attempt, error = %format!("{:#}", e), "Failed to record ingestion failure");
        }

        CycleOutcome::Failed(message)
    }

    async fn fetch(&self) -> Result<FetchedBatch, SourceError> {
        match &self.mode {
            IngestionMode::Bulk => Ok(FetchedBatch {
                identities: self.source.fetch_all().await?,
                failures: Vec::new(),
            }),
            IngestionMode::PerAddress(addresses) => Ok(self.fetch_per_address(addresses).await),
        }
    }

    async fn fetch_per_address(&self, addresses: &[IdentityAddress]) -> FetchedBatch {
        let mut identities = Vec::with_capacity(addresses.len());
        let mut failures = Vec::new();

        for (index, batch) in addresses.chunks(self.settings.batch_size.max(1)).enumerate() {
            if index > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            debug!(batch = index + 1, size = batch.len(), "Fetching identity batch");

            for address in batch {
                match self.source.fetch_one(address).await {
                    Ok(identity) => identities.push(identity),
                    Err(e) => {
                        debug!(%address, error = %e, "Identity fetch failed");
                        failures.push((address.clone(), e));
                    }
                }
            }
        }

        FetchedBatch {
            identities,
            failures,
        }
    }
}

fn first_failure(failures: &[(IdentityAddress, SourceError)]) -> String {
    failures
        .first()
        .map(|(address, e)| format!("first: {}: {}", address, e))
        .unwrap_or_default()
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
