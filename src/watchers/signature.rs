//! Signature aggregation watcher
//!
//! Follows `SignatureAdded` events on the side chain wallet and keeps a
//! running tally per source transaction. When the tally reaches the wallet
//! threshold the count is re-derived from the ledger, the aggregated
//! signatures are read back and a `finalizeWithdrawal` job is queued for the
//! main chain wallet.

use alloy::primitives::{Address, B256};
use eyre::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{pause_or_stop, BlockCursor, WatcherSummary};
use crate::bounded_cache::BoundedHashCache;
use crate::config::ScanConfig;
use crate::error::RelayError;
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::quorum::{fetch_aggregated, quorum_status, required_threshold, AttestationTally};
use crate::scanner::{scan_signature_events, BlockWindows};
use crate::types::{Chain, Direction, SignatureRecord};
use crate::writers::{JobSender, RelayJob};

/// Outcome of a quorum check against the ledger
enum Forward {
    Queued,
    /// Ledger count is below the threshold; more signatures may follow
    Pending,
    /// Ledger count is past the threshold; this transaction will never be forwarded
    OverSigned,
}

pub struct AggregationWatcher {
    ledger: Arc<dyn LedgerClient>,
    wallet: Address,
    /// Identity used for read-only wallet calls
    caller: Address,
    scan: ScanConfig,
    jobs: JobSender,
    stop: watch::Receiver<bool>,
    tally: AttestationTally,
    /// Forwarded or over-signed; later signatures for these are ignored
    settled: BoundedHashCache,
    threshold: Option<u8>,
}

impl AggregationWatcher {
    pub fn new(
        side_ledger: Arc<dyn LedgerClient>,
        side_wallet: Address,
        caller: Address,
        scan: ScanConfig,
        jobs: JobSender,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger: side_ledger,
            wallet: side_wallet,
            caller,
            scan,
            jobs,
            stop,
            tally: AttestationTally::new(),
            settled: BoundedHashCache::default(),
            threshold: None,
        }
    }

    pub async fn run(mut self) -> Result<WatcherSummary> {
        let tag = Direction::SideToMain.tag();
        let mut summary = WatcherSummary::new("aggregate");
        let mut cursor = BlockCursor::new(Chain::Side, self.scan);

        info!(
            direction = tag,
            wallet = %self.wallet,
            start_block = self.scan.start_block,
            "Aggregation watcher started"
        );

        loop {
            if *self.stop.borrow() {
                break;
            }

            if let Some((from, to)) = cursor.next_range(self.ledger.as_ref()).await? {
                match self.threshold().await {
                    Ok(threshold) => {
                        if !self
                            .process_range(from, to, threshold, &mut cursor, &mut summary)
                            .await?
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        // Range stays unscanned until the threshold can be read
                        summary.failed += 1;
                        warn!(direction = tag, error = %e, "Cannot read wallet threshold");
                    }
                }
            }

            if cursor.finished() || pause_or_stop(&mut self.stop, self.scan.poll_interval).await {
                break;
            }
        }

        info!(
            direction = tag,
            ?summary,
            pending = self.tally.len(),
            "Aggregation watcher stopped"
        );
        Ok(summary)
    }

    async fn threshold(&mut self) -> Result<u8, RelayError> {
        if let Some(threshold) = self.threshold {
            return Ok(threshold);
        }
        let threshold = required_threshold(self.ledger.as_ref(), self.wallet, self.caller).await?;
        info!(threshold, "Wallet signature threshold");
        self.threshold = Some(threshold);
        Ok(threshold)
    }

    /// Scan `[from, to]` window by window; false when interrupted by the stop flag
    async fn process_range(
        &mut self,
        from: u64,
        to: u64,
        threshold: u8,
        cursor: &mut BlockCursor,
        summary: &mut WatcherSummary,
    ) -> Result<bool> {
        for (start, end) in BlockWindows::new(from, to, self.scan.window_blocks) {
            if *self.stop.borrow() {
                return Ok(false);
            }
            if !self.process_window(start, end, threshold, summary).await? {
                return Ok(false);
            }
            cursor.advance(end);
            summary.last_block = Some(end);
        }
        Ok(true)
    }

    async fn process_window(
        &mut self,
        from: u64,
        to: u64,
        threshold: u8,
        summary: &mut WatcherSummary,
    ) -> Result<bool> {
        let ledger = self.ledger.clone();
        let records = scan_signature_events(
            ledger.as_ref(),
            self.wallet,
            from,
            to,
            self.scan.window_blocks,
        );
        futures::pin_mut!(records);

        while let Some(record) = records.next().await {
            summary.events_seen += 1;
            self.on_signature(record, threshold, summary).await?;

            if *self.stop.borrow() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn on_signature(
        &mut self,
        record: SignatureRecord,
        threshold: u8,
        summary: &mut WatcherSummary,
    ) -> Result<()> {
        let tag = Direction::SideToMain.tag();
        let tx = record.source_tx_hash;
        if self.settled.contains(&tx) {
            debug!(direction = tag, source_tx_hash = %tx, "Already settled, ignoring signature");
            return Ok(());
        }

        let count = self.tally.record(tx, record.signer);
        debug!(
            direction = tag,
            source_tx_hash = %tx,
            signer = %record.signer,
            block = ?record.block_number,
            count,
            threshold,
            "Signature recorded"
        );
        if !self.tally.reached(&tx, threshold) {
            return Ok(());
        }

        match self.forward(tx).await {
            Ok(Forward::Queued) => {
                summary.jobs_queued += 1;
                self.settle(tx);
            }
            Ok(Forward::OverSigned) => self.settle(tx),
            Ok(Forward::Pending) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                summary.failed += 1;
                error!(direction = tag, source_tx_hash = %tx, error = %e, "Cannot forward withdrawal");
            }
        }
        Ok(())
    }

    fn settle(&mut self, source_tx_hash: B256) {
        self.settled.insert(source_tx_hash);
        self.tally.remove(&source_tx_hash);
    }

    /// Confirm the quorum on the ledger and queue the finalize job
    async fn forward(&self, source_tx_hash: B256) -> Result<Forward, RelayError> {
        let tag = Direction::SideToMain.tag();
        let status = quorum_status(
            self.ledger.as_ref(),
            self.wallet,
            self.caller,
            source_tx_hash,
            self.scan.window_blocks,
        )
        .await?;
        if !status.reached() {
            warn!(
                direction = tag,
                source_tx_hash = %source_tx_hash,
                count = status.count,
                threshold = status.threshold,
                "Local tally disagrees with ledger, not forwarding"
            );
            if status.count > usize::from(status.threshold) {
                return Ok(Forward::OverSigned);
            }
            return Ok(Forward::Pending);
        }
        metrics::record_quorum_reached(Chain::Side.as_str());

        let withdrawal =
            fetch_aggregated(self.ledger.as_ref(), self.wallet, self.caller, source_tx_hash)
                .await?;
        info!(
            direction = tag,
            source_tx_hash = %source_tx_hash,
            destination = %withdrawal.destination,
            value = %withdrawal.value,
            signatures = withdrawal.signature_count(),
            "Quorum reached, forwarding withdrawal"
        );

        let job = RelayJob::FinalizeWithdrawal {
            source_tx_hash,
            withdrawal,
        };
        if !self.jobs.send(job).await {
            return Err(RelayError::Submission {
                chain: Chain::Main,
                call: "finalizeWithdrawal",
                reason: "submission queue closed".to_string(),
            });
        }
        Ok(Forward::Queued)
    }
}
