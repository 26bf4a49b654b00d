//! Block watchers
//!
//! Each pipeline runs as a watcher task feeding the single submission
//! worker. This module holds the block cursor shared by the watchers and
//! the manager that starts them and stops them on the shutdown flag.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use eyre::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{ScanConfig, SubmissionConfig};
use crate::error::{LedgerError, RelayError};
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::types::Chain;
use crate::writers::{job_queue, JobSender, RelayJob, SubmissionWorker, WorkerSummary};

pub mod deposit;
pub mod signature;

pub use deposit::DepositWatcher;
pub use signature::AggregationWatcher;

/// Consecutive head lookups that may fail before a ledger counts as unreachable
const MAX_HEAD_FAILURES: u32 = 10;

/// Counters reported by a watcher when it exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSummary {
    pub name: &'static str,
    pub events_seen: usize,
    pub jobs_queued: usize,
    pub failed: usize,
    /// Last block fully scanned
    pub last_block: Option<u64>,
}

impl WatcherSummary {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            events_seen: 0,
            jobs_queued: 0,
            failed: 0,
            last_block: None,
        }
    }
}

/// Everything the relay did before it stopped
#[derive(Debug, Clone)]
pub struct RelaySummary {
    pub watchers: Vec<WatcherSummary>,
    pub worker: WorkerSummary,
}

/// Block cursor of one watcher
///
/// Yields the next finalized range to scan. Without `follow` it stops at the
/// head observed on the first pass; `end_block` always bounds it.
pub(crate) struct BlockCursor {
    chain: Chain,
    next: u64,
    scan: ScanConfig,
    caught_up: bool,
    head_failures: u32,
}

impl BlockCursor {
    pub(crate) fn new(chain: Chain, scan: ScanConfig) -> Self {
        Self {
            chain,
            next: scan.start_block,
            scan,
            caught_up: false,
            head_failures: 0,
        }
    }

    /// Next range to scan; `Ok(None)` when there is nothing new yet
    pub(crate) async fn next_range(
        &mut self,
        ledger: &dyn LedgerClient,
    ) -> Result<Option<(u64, u64)>, RelayError> {
        let head = match ledger.latest_block().await {
            Ok(head) => {
                self.head_failures = 0;
                head
            }
            Err(e) => return self.head_failed(e).map(|_| None),
        };

        let safe = head.saturating_sub(self.scan.finality_blocks);
        let target = self.scan.end_block.map_or(safe, |end| end.min(safe));
        self.caught_up = true;

        if self.next > target {
            return Ok(None);
        }
        Ok(Some((self.next, target)))
    }

    fn head_failed(&mut self, e: LedgerError) -> Result<(), RelayError> {
        self.head_failures += 1;
        if self.head_failures >= MAX_HEAD_FAILURES {
            return Err(RelayError::Connection {
                chain: self.chain,
                reason: format!("{} consecutive head lookups failed: {}", self.head_failures, e),
            });
        }
        let err = RelayError::TransientRead {
            chain: self.chain,
            context: "latest block".to_string(),
            source: e,
        };
        warn!(error = %err, failures = self.head_failures, "Head lookup failed, will retry");
        Ok(())
    }

    /// Mark `[.., to]` as scanned
    pub(crate) fn advance(&mut self, to: u64) {
        self.next = to.saturating_add(1);
        metrics::record_block_scanned(self.chain.as_str(), to);
    }

    /// True once this cursor has nothing left to scan
    pub(crate) fn finished(&self) -> bool {
        let past_end = self.scan.end_block.is_some_and(|end| self.next > end);
        past_end || (self.caught_up && !self.scan.follow)
    }
}

/// Sleep for `interval` unless the stop flag is raised first
///
/// Returns true when the watcher should stop.
pub(crate) async fn pause_or_stop(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    let raised = tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = stop.wait_for(|s| *s) => true,
    };
    raised || *stop.borrow()
}

/// Settings shared by every pipeline of one relay node
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub main_wallet: Address,
    pub side_wallet: Address,
    pub scan: ScanConfig,
    pub submission: SubmissionConfig,
}

enum Watcher {
    Deposit(DepositWatcher),
    Aggregation(AggregationWatcher),
}

/// Runs the watcher pipelines and the submission worker
///
/// Watchers only scan and queue jobs. When the external shutdown future
/// resolves the stop flag is raised: watchers finish their current ledger
/// call and drop their queue handles, then the worker drains what is left.
pub struct WatcherManager {
    settings: RelaySettings,
    sealer: PrivateKeySigner,
    watchers: Vec<Watcher>,
    jobs: JobSender,
    jobs_rx: tokio::sync::mpsc::Receiver<RelayJob>,
    stop_tx: watch::Sender<bool>,
}

impl WatcherManager {
    pub fn new(settings: RelaySettings, sealer: PrivateKeySigner) -> Self {
        let (jobs, jobs_rx) = job_queue(settings.submission.queue_size);
        let (stop_tx, _) = watch::channel(false);
        Self {
            settings,
            sealer,
            watchers: Vec::new(),
            jobs,
            jobs_rx,
            stop_tx,
        }
    }

    /// Mirror main chain deposits onto the side chain wallet
    pub fn with_mirror(mut self, main_ledger: Arc<dyn LedgerClient>) -> Self {
        self.watchers.push(Watcher::Deposit(DepositWatcher::mirror(
            main_ledger,
            self.settings.main_wallet,
            self.settings.scan,
            self.jobs.clone(),
            self.stop_tx.subscribe(),
        )));
        self
    }

    /// Attest side chain deposits with the sealer key
    pub fn with_attestation(mut self, side_ledger: Arc<dyn LedgerClient>) -> Self {
        self.watchers.push(Watcher::Deposit(DepositWatcher::attest(
            side_ledger,
            self.settings.side_wallet,
            self.sealer.clone(),
            self.settings.scan,
            self.jobs.clone(),
            self.stop_tx.subscribe(),
        )));
        self
    }

    /// Forward side chain withdrawals once quorum is reached
    pub fn with_aggregation(mut self, side_ledger: Arc<dyn LedgerClient>) -> Self {
        self.watchers
            .push(Watcher::Aggregation(AggregationWatcher::new(
                side_ledger,
                self.settings.side_wallet,
                self.sealer.address(),
                self.settings.scan,
                self.jobs.clone(),
                self.stop_tx.subscribe(),
            )));
        self
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Run every pipeline to completion
    ///
    /// Returns an error when a watcher stopped on a fatal error; the other
    /// pipelines are stopped and drained first.
    pub async fn run(
        self,
        worker: SubmissionWorker,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RelaySummary> {
        let Self {
            watchers,
            jobs,
            jobs_rx,
            stop_tx,
            ..
        } = self;

        // Only the watchers keep the queue open
        drop(jobs);
        let worker_handle = tokio::spawn(worker.run(jobs_rx));

        let mut join_set = JoinSet::new();
        for watcher in watchers {
            match watcher {
                Watcher::Deposit(w) => join_set.spawn(w.run()),
                Watcher::Aggregation(w) => join_set.spawn(w.run()),
            };
        }
        info!(watchers = join_set.len(), "Watcher manager started");

        let mut summaries = Vec::new();
        let mut fatal: Option<eyre::Report> = None;
        tokio::pin!(shutdown);
        let mut shutdown_done = false;

        while !join_set.is_empty() {
            tokio::select! {
                _ = &mut shutdown, if !shutdown_done => {
                    shutdown_done = true;
                    info!("Shutdown requested, stopping watchers");
                    stop_tx.send_replace(true);
                }
                maybe_done = join_set.join_next() => {
                    match maybe_done {
                        Some(Ok(Ok(summary))) => {
                            info!(?summary, "Watcher finished");
                            summaries.push(summary);
                        }
                        Some(Ok(Err(e))) => {
                            error!(error = %e, "A watcher stopped with error, stopping the others");
                            stop_tx.send_replace(true);
                            fatal.get_or_insert(e);
                        }
                        Some(Err(e)) => {
                            error!("A watcher task panicked: {:?}", e);
                            stop_tx.send_replace(true);
                            fatal.get_or_insert(eyre::eyre!("watcher task panicked: {}", e));
                        }
                        None => break,
                    }
                }
            }
        }

        let worker_summary = worker_handle
            .await
            .map_err(|e| eyre::eyre!("submission worker panicked: {}", e))?;

        match fatal {
            Some(e) => Err(e),
            None => Ok(RelaySummary {
                watchers: summaries,
                worker: worker_summary,
            }),
        }
    }
}
