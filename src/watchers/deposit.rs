//! Deposit watcher
//!
//! Scans one wallet for `Deposit` events and turns each into a relay job:
//! a plain mirrored transfer for main chain deposits, a signed attestation
//! for side chain deposits.

use alloy::primitives::{Address, Bytes};
use alloy::signers::local::PrivateKeySigner;
use eyre::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{pause_or_stop, BlockCursor, WatcherSummary};
use crate::config::ScanConfig;
use crate::error::RelayError;
use crate::hash::{compute_digest, PROTOCOL_VERSION};
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::scanner::{scan_deposits, BlockWindows};
use crate::signer::sign;
use crate::types::{DepositInfo, Direction};
use crate::writers::{JobSender, RelayJob};

/// What the watcher does with a deposit
enum Mode {
    /// Forward the deposit as observed
    Mirror,
    /// Sign the canonical digest bound to the watched wallet
    Attest(PrivateKeySigner),
}

pub struct DepositWatcher {
    direction: Direction,
    ledger: Arc<dyn LedgerClient>,
    wallet: Address,
    mode: Mode,
    scan: ScanConfig,
    jobs: JobSender,
    stop: watch::Receiver<bool>,
}

impl DepositWatcher {
    /// Watch the main chain wallet and mirror deposits onto the side chain
    pub fn mirror(
        main_ledger: Arc<dyn LedgerClient>,
        main_wallet: Address,
        scan: ScanConfig,
        jobs: JobSender,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            direction: Direction::MainToSide,
            ledger: main_ledger,
            wallet: main_wallet,
            mode: Mode::Mirror,
            scan,
            jobs,
            stop,
        }
    }

    /// Watch the side chain wallet and attest deposits with the sealer key
    pub fn attest(
        side_ledger: Arc<dyn LedgerClient>,
        side_wallet: Address,
        sealer: PrivateKeySigner,
        scan: ScanConfig,
        jobs: JobSender,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            direction: Direction::SideToMain,
            ledger: side_ledger,
            wallet: side_wallet,
            mode: Mode::Attest(sealer),
            scan,
            jobs,
            stop,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run the watcher loop until the range is done or the stop flag is raised
    pub async fn run(mut self) -> Result<WatcherSummary> {
        let tag = self.direction.tag();
        let mut summary = WatcherSummary::new(tag);
        let mut cursor = BlockCursor::new(self.direction.source(), self.scan);

        info!(
            direction = tag,
            wallet = %self.wallet,
            start_block = self.scan.start_block,
            end_block = ?self.scan.end_block,
            follow = self.scan.follow,
            "Deposit watcher started"
        );

        loop {
            if *self.stop.borrow() {
                break;
            }

            if let Some((from, to)) = cursor.next_range(self.ledger.as_ref()).await? {
                debug!(direction = tag, from_block = from, to_block = to, "Scanning deposits");
                if !self.process_range(from, to, &mut cursor, &mut summary).await? {
                    break;
                }
            }

            if cursor.finished() || pause_or_stop(&mut self.stop, self.scan.poll_interval).await {
                break;
            }
        }

        info!(direction = tag, ?summary, "Deposit watcher stopped");
        Ok(summary)
    }

    /// Scan `[from, to]` window by window; false when interrupted by the stop flag
    ///
    /// The cursor only moves past windows that were fully processed.
    async fn process_range(
        &self,
        from: u64,
        to: u64,
        cursor: &mut BlockCursor,
        summary: &mut WatcherSummary,
    ) -> Result<bool> {
        for (start, end) in BlockWindows::new(from, to, self.scan.window_blocks) {
            if *self.stop.borrow() {
                return Ok(false);
            }
            if !self.process_window(start, end, summary).await? {
                return Ok(false);
            }
            cursor.advance(end);
            summary.last_block = Some(end);
        }
        Ok(true)
    }

    async fn process_window(
        &self,
        from: u64,
        to: u64,
        summary: &mut WatcherSummary,
    ) -> Result<bool> {
        let tag = self.direction.tag();
        let deposits = scan_deposits(
            self.ledger.as_ref(),
            self.wallet,
            from,
            to,
            self.scan.window_blocks,
        );
        futures::pin_mut!(deposits);

        while let Some(deposit) = deposits.next().await {
            summary.events_seen += 1;
            metrics::record_deposit_detected(tag);
            info!(
                direction = tag,
                block = ?deposit.block_number,
                source_tx_hash = %deposit.source_tx_hash,
                sender = %deposit.event.sender,
                receiver = %deposit.event.receiver,
                value = %deposit.event.value,
                "Deposit detected"
            );

            match self.build_job(deposit) {
                Ok(job) => {
                    if !self.jobs.send(job).await {
                        return Err(eyre::eyre!("submission queue closed"));
                    }
                    summary.jobs_queued += 1;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    summary.failed += 1;
                    error!(direction = tag, error = %e, "Dropping deposit");
                }
            }

            if *self.stop.borrow() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn build_job(&self, deposit: DepositInfo) -> Result<RelayJob, RelayError> {
        let data = Bytes::new();
        match &self.mode {
            Mode::Mirror => Ok(RelayJob::RecordTransfer { deposit, data }),
            Mode::Attest(sealer) => {
                let digest = compute_digest(
                    self.wallet,
                    deposit.source_tx_hash,
                    deposit.event.receiver,
                    deposit.event.value,
                    &data,
                    PROTOCOL_VERSION,
                );
                let signature = sign(digest, sealer)?;
                debug!(
                    direction = self.direction.tag(),
                    source_tx_hash = %deposit.source_tx_hash,
                    %digest,
                    v = signature.v,
                    "Deposit attested"
                );
                Ok(RelayJob::RecordSignature {
                    deposit,
                    data,
                    signature,
                })
            }
        }
    }
}
