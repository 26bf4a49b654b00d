//! Wallet event scanning
//!
//! Turns a block range into a lazy stream of decoded events. Ranges are read
//! in windows; a window that cannot be read is retried block by block and any
//! block that still fails is logged and skipped, so one bad block never ends
//! a scan.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::contracts::InterchainWallet;
use crate::error::RelayError;
use crate::ledger::{LedgerClient, LedgerLog, LogFilter};
use crate::metrics;
use crate::types::{DepositEvent, DepositInfo, SignatureRecord};

/// A deposit log carries the signature topic plus two indexed addresses
const DEPOSIT_TOPIC_COUNT: usize = 3;

/// Split `[from, to]` into inclusive windows of at most `size` blocks
#[derive(Debug, Clone)]
pub struct BlockWindows {
    next: Option<u64>,
    to: u64,
    size: u64,
}

impl BlockWindows {
    pub fn new(from: u64, to: u64, size: u64) -> Self {
        Self {
            next: (from <= to).then_some(from),
            to,
            size: size.max(1),
        }
    }
}

impl Iterator for BlockWindows {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.saturating_add(self.size - 1).min(self.to);
        self.next = if end >= self.to { None } else { Some(end + 1) };
        Some((start, end))
    }
}

/// Read one window of logs, degrading to per-block reads on failure
pub async fn fetch_window(ledger: &dyn LedgerClient, filter: LogFilter) -> Vec<LedgerLog> {
    let chain = ledger.chain();
    match ledger.get_logs(&filter).await {
        Ok(logs) => logs,
        Err(e) if filter.from_block < filter.to_block => {
            warn!(
                chain = %chain,
                from_block = filter.from_block,
                to_block = filter.to_block,
                error = %e,
                "Log window unreadable, retrying block by block"
            );
            let mut logs = Vec::new();
            for block in filter.from_block..=filter.to_block {
                match ledger.get_logs(&filter.single_block(block)).await {
                    Ok(block_logs) => logs.extend(block_logs),
                    Err(e) => skip_block(&RelayError::TransientRead {
                        chain,
                        context: format!("logs of block {}", block),
                        source: e,
                    }),
                }
            }
            logs
        }
        Err(e) => {
            skip_block(&RelayError::TransientRead {
                chain,
                context: format!("logs of block {}", filter.from_block),
                source: e,
            });
            Vec::new()
        }
    }
}

fn skip_block(err: &RelayError) {
    if let RelayError::TransientRead { chain, .. } = err {
        metrics::SCAN_ERRORS
            .with_label_values(&[chain.as_str(), "read"])
            .inc();
    }
    warn!(error = %err, "Skipping unreadable block");
}

/// Stream every `Deposit` emitted by `wallet` in `[from_block, to_block]`
///
/// The stream is finite and ends once the range is exhausted. It yields
/// deposits in ledger log order. Re-invoke with the same range to repeat.
pub fn scan_deposits<'a>(
    ledger: &'a dyn LedgerClient,
    wallet: Address,
    from_block: u64,
    to_block: u64,
    window: u64,
) -> impl Stream<Item = DepositInfo> + Send + 'a {
    let base = LogFilter::new(wallet, from_block, to_block)
        .event(InterchainWallet::Deposit::SIGNATURE_HASH);

    stream::iter(BlockWindows::new(from_block, to_block, window))
        .then(move |(start, end)| {
            fetch_window(
                ledger,
                LogFilter {
                    from_block: start,
                    to_block: end,
                    ..base
                },
            )
        })
        .flat_map(stream::iter)
        .filter_map(move |log| {
            let decoded = match decode_deposit_log(&log) {
                Ok(Some(info)) => Some(info),
                Ok(None) => None,
                Err(e) => {
                    metrics::SCAN_ERRORS
                        .with_label_values(&[ledger.chain().as_str(), "decode"])
                        .inc();
                    warn!(
                        chain = %ledger.chain(),
                        block = ?log.block_number,
                        tx_hash = ?log.transaction_hash,
                        error = %e,
                        "Discarding undecodable deposit log"
                    );
                    None
                }
            };
            futures::future::ready(decoded)
        })
}

/// Stream every `SignatureAdded` emitted by `wallet` in `[from_block, to_block]`
pub fn scan_signature_events<'a>(
    ledger: &'a dyn LedgerClient,
    wallet: Address,
    from_block: u64,
    to_block: u64,
    window: u64,
) -> impl Stream<Item = SignatureRecord> + Send + 'a {
    let base = LogFilter::new(wallet, from_block, to_block)
        .event(InterchainWallet::SignatureAdded::SIGNATURE_HASH);

    stream::iter(BlockWindows::new(from_block, to_block, window))
        .then(move |(start, end)| {
            fetch_window(
                ledger,
                LogFilter {
                    from_block: start,
                    to_block: end,
                    ..base
                },
            )
        })
        .flat_map(stream::iter)
        .filter_map(move |log| {
            let decoded = match decode_signature_log(&log) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        chain = %ledger.chain(),
                        block = ?log.block_number,
                        error = %e,
                        "Discarding undecodable signature log"
                    );
                    None
                }
            };
            futures::future::ready(decoded)
        })
}

/// Decode a `Deposit` log
///
/// `Ok(None)` means the log is not a deposit: empty payload, a different
/// event, or the wrong number of topics. A deposit-shaped log whose payload
/// or topics cannot be decoded is an error.
pub fn decode_deposit_log(log: &LedgerLog) -> Result<Option<DepositInfo>, RelayError> {
    if log.data.is_empty() {
        return Ok(None);
    }

    // Non-indexed payload: uint256 value
    let value = decode_value(&log.data)?;

    if log.topics.len() != DEPOSIT_TOPIC_COUNT {
        debug!(
            topics = log.topics.len(),
            tx_hash = ?log.transaction_hash,
            "Ignoring log with unexpected topic count"
        );
        return Ok(None);
    }
    if log.topics[0] != InterchainWallet::Deposit::SIGNATURE_HASH {
        return Ok(None);
    }

    // Indexed topics carry the addresses:
    // topics[1] = sender, topics[2] = receiver
    let sender = topic_to_address(&log.topics[1])?;
    let receiver = topic_to_address(&log.topics[2])?;

    let source_tx_hash = log
        .transaction_hash
        .ok_or_else(|| RelayError::Decode("missing transaction hash".to_string()))?;

    Ok(Some(DepositInfo {
        event: DepositEvent {
            sender,
            receiver,
            value,
        },
        source_tx_hash,
        block_number: log.block_number,
    }))
}

/// Decode a `SignatureAdded` log, `Ok(None)` for any other event
pub fn decode_signature_log(log: &LedgerLog) -> Result<Option<SignatureRecord>, RelayError> {
    if log.topics.first() != Some(&InterchainWallet::SignatureAdded::SIGNATURE_HASH) {
        return Ok(None);
    }

    let event = InterchainWallet::SignatureAdded::decode_raw_log(
        log.topics.iter().copied(),
        &log.data,
        true,
    )
    .map_err(|e| RelayError::Decode(e.to_string()))?;

    Ok(Some(SignatureRecord {
        source_tx_hash: event.txHash,
        signer: event.signer,
        block_number: log.block_number,
    }))
}

fn decode_value(data: &[u8]) -> Result<U256, RelayError> {
    if data.len() != 32 {
        return Err(RelayError::Decode(format!(
            "deposit payload must be one 32-byte word, got {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_be_slice(data))
}

/// Indexed addresses are right-aligned in a 32-byte topic
fn topic_to_address(topic: &B256) -> Result<Address, RelayError> {
    if topic[..12].iter().any(|b| *b != 0) {
        return Err(RelayError::Decode(format!(
            "topic {} is not a padded address",
            topic
        )));
    }
    Ok(Address::from_word(*topic))
}
