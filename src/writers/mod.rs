//! Submission side of the relay
//!
//! Watchers never write to a ledger themselves. They push [`RelayJob`]s onto
//! a bounded queue drained by a single [`SubmissionWorker`], which owns the
//! writers for both wallets and applies the retry policy.

use alloy::primitives::{Bytes, B256};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::RelayError;
use crate::metrics;
use crate::signer::Signature;
use crate::types::{AggregatedWithdrawal, Chain, DepositInfo, Direction};

pub mod retry;
pub mod wallet;

pub use retry::{classify_error, with_retry, RetryConfig};
pub use wallet::{Submitted, WalletWriter};

/// A ledger write produced by a watcher
#[derive(Debug, Clone)]
pub enum RelayJob {
    /// Mirror a main chain deposit on the side chain wallet
    RecordTransfer { deposit: DepositInfo, data: Bytes },
    /// Attest a side chain deposit on the side chain wallet
    RecordSignature {
        deposit: DepositInfo,
        data: Bytes,
        signature: Signature,
    },
    /// Release a fully attested withdrawal on the main chain wallet
    FinalizeWithdrawal {
        source_tx_hash: B256,
        withdrawal: AggregatedWithdrawal,
    },
}

impl RelayJob {
    pub fn call_name(&self) -> &'static str {
        match self {
            RelayJob::RecordTransfer { .. } => "recordTransfer",
            RelayJob::RecordSignature { .. } => "recordSignature",
            RelayJob::FinalizeWithdrawal { .. } => "finalizeWithdrawal",
        }
    }

    /// Ledger whose wallet receives the call
    pub fn target_chain(&self) -> Chain {
        match self {
            RelayJob::RecordTransfer { .. } | RelayJob::RecordSignature { .. } => Chain::Side,
            RelayJob::FinalizeWithdrawal { .. } => Chain::Main,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RelayJob::RecordTransfer { .. } => Direction::MainToSide,
            RelayJob::RecordSignature { .. } | RelayJob::FinalizeWithdrawal { .. } => {
                Direction::SideToMain
            }
        }
    }

    pub fn source_tx_hash(&self) -> B256 {
        match self {
            RelayJob::RecordTransfer { deposit, .. } | RelayJob::RecordSignature { deposit, .. } => {
                deposit.source_tx_hash
            }
            RelayJob::FinalizeWithdrawal { source_tx_hash, .. } => *source_tx_hash,
        }
    }
}

/// Sending half of the job queue, one clone per watcher
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<RelayJob>,
}

impl JobSender {
    /// Queue a job, waiting while the queue is full
    ///
    /// Returns false once the worker is gone.
    pub async fn send(&self, job: RelayJob) -> bool {
        let ok = self.tx.send(job).await.is_ok();
        if ok {
            metrics::QUEUED_JOBS.inc();
        }
        ok
    }
}

/// Create the bounded job queue
pub fn job_queue(capacity: usize) -> (JobSender, mpsc::Receiver<RelayJob>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobSender { tx }, rx)
}

/// Counters reported by the worker when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub submitted: usize,
    pub failed: usize,
    pub transfers_recorded: usize,
    pub signatures_recorded: usize,
    pub withdrawals_finalized: usize,
}

/// Drains the job queue and performs every ledger write
pub struct SubmissionWorker {
    main_writer: Option<WalletWriter>,
    side_writer: Option<WalletWriter>,
    retry_config: RetryConfig,
}

impl SubmissionWorker {
    pub fn new(
        main_writer: Option<WalletWriter>,
        side_writer: Option<WalletWriter>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            main_writer,
            side_writer,
            retry_config,
        }
    }

    /// Process jobs until every sender is dropped and the queue is empty
    pub async fn run(self, mut jobs: mpsc::Receiver<RelayJob>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!(
            main_writer = self.main_writer.is_some(),
            side_writer = self.side_writer.is_some(),
            max_retries = self.retry_config.max_retries,
            "Submission worker started"
        );

        while let Some(job) = jobs.recv().await {
            metrics::QUEUED_JOBS.dec();
            let call = job.call_name();
            let chain = job.target_chain();
            let direction = job.direction();
            let source_tx_hash = job.source_tx_hash();
            let started = Instant::now();

            match self.process(&job).await {
                Ok(submitted) => {
                    summary.submitted += 1;
                    match job {
                        RelayJob::RecordTransfer { .. } => summary.transfers_recorded += 1,
                        RelayJob::RecordSignature { .. } => summary.signatures_recorded += 1,
                        RelayJob::FinalizeWithdrawal { .. } => summary.withdrawals_finalized += 1,
                    }
                    metrics::record_submission(chain.as_str(), call, true);
                    info!(
                        direction = %direction,
                        call,
                        source_tx_hash = %source_tx_hash,
                        tx_hash = %submitted.tx_hash,
                        block = ?submitted.block_number,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Relay submission succeeded"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::record_submission(chain.as_str(), call, false);
                    error!(
                        direction = %direction,
                        call,
                        source_tx_hash = %source_tx_hash,
                        error_class = ?classify_error(&e.to_string()),
                        error = %e,
                        "Relay submission failed, dropping for this pass"
                    );
                }
            }
        }

        info!(?summary, "Submission worker drained, stopping");
        summary
    }

    async fn process(&self, job: &RelayJob) -> Result<Submitted, RelayError> {
        let chain = job.target_chain();
        let writer = match chain {
            Chain::Main => self.main_writer.as_ref(),
            Chain::Side => self.side_writer.as_ref(),
        }
        .ok_or_else(|| RelayError::Submission {
            chain,
            call: job.call_name(),
            reason: "no writer configured for this ledger".to_string(),
        })?;

        with_retry(&self.retry_config, |_attempt| async move {
            match job {
                RelayJob::RecordTransfer { deposit, data } => {
                    writer.record_transfer(deposit, data.clone()).await
                }
                RelayJob::RecordSignature {
                    deposit,
                    data,
                    signature,
                } => writer.record_signature(deposit, data.clone(), signature).await,
                RelayJob::FinalizeWithdrawal {
                    source_tx_hash,
                    withdrawal,
                } => writer.finalize_withdrawal(*source_tx_hash, withdrawal).await,
            }
        })
        .await
    }
}
