//! Quorum detection for sealer attestations
//!
//! The hot path is [`AttestationTally`], fed incrementally from new
//! `SignatureAdded` events. [`has_enough_signatures`] re-derives the count
//! from the wallet's full event history and is used to confirm a quorum
//! before anything is forwarded.

use std::collections::HashMap;

use alloy::primitives::{Address, B256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, warn};

use crate::contracts::InterchainWallet;
use crate::error::RelayError;
use crate::ledger::{LedgerClient, LogFilter};
use crate::scanner::{decode_signature_log, BlockWindows};
use crate::types::AggregatedWithdrawal;

/// Signature count for one source transaction against the wallet threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumStatus {
    pub count: usize,
    pub threshold: u8,
}

impl QuorumStatus {
    /// Strict equality: a count past the threshold is not a quorum
    pub fn reached(&self) -> bool {
        self.count == usize::from(self.threshold)
    }
}

/// Read the wallet's `requiredThreshold`
pub async fn required_threshold(
    ledger: &dyn LedgerClient,
    wallet: Address,
    caller: Address,
) -> Result<u8, RelayError> {
    let input = InterchainWallet::requiredThresholdCall {}.abi_encode();
    let output = ledger
        .call(caller, wallet, input.into())
        .await
        .map_err(|source| RelayError::Query {
            chain: ledger.chain(),
            what: "requiredThreshold",
            source,
        })?;

    let decoded = InterchainWallet::requiredThresholdCall::abi_decode_returns(&output, true)
        .map_err(|e| RelayError::Decode(format!("requiredThreshold response: {}", e)))?;
    Ok(decoded._0)
}

/// Count every `SignatureAdded` for `source_tx_hash` in the wallet's history
///
/// Unlike the deposit scanner this never skips a block: a gap would
/// under-count, so any read failure fails the whole count.
pub async fn count_signatures(
    ledger: &dyn LedgerClient,
    wallet: Address,
    source_tx_hash: B256,
    window: u64,
) -> Result<usize, RelayError> {
    let chain = ledger.chain();
    let head = ledger
        .latest_block()
        .await
        .map_err(|source| RelayError::Query {
            chain,
            what: "latest block",
            source,
        })?;

    let mut count = 0;
    for (from, to) in BlockWindows::new(0, head, window) {
        let filter = LogFilter::new(wallet, from, to)
            .event(InterchainWallet::SignatureAdded::SIGNATURE_HASH);
        let logs = ledger
            .get_logs(&filter)
            .await
            .map_err(|source| RelayError::Query {
                chain,
                what: "SignatureAdded history",
                source,
            })?;

        for log in &logs {
            match decode_signature_log(log) {
                Ok(Some(record)) if record.source_tx_hash == source_tx_hash => count += 1,
                Ok(_) => {}
                Err(e) => warn!(
                    chain = %chain,
                    block = ?log.block_number,
                    error = %e,
                    "Ignoring undecodable signature log"
                ),
            }
        }
    }

    Ok(count)
}

/// Re-derive the quorum state of `source_tx_hash` from the ledger
pub async fn quorum_status(
    ledger: &dyn LedgerClient,
    wallet: Address,
    caller: Address,
    source_tx_hash: B256,
    window: u64,
) -> Result<QuorumStatus, RelayError> {
    let threshold = required_threshold(ledger, wallet, caller).await?;
    let count = count_signatures(ledger, wallet, source_tx_hash, window).await?;
    debug!(
        chain = %ledger.chain(),
        source_tx_hash = %source_tx_hash,
        count,
        threshold,
        "Quorum status"
    );
    Ok(QuorumStatus { count, threshold })
}

/// True exactly when the recorded signature count equals the threshold
pub async fn has_enough_signatures(
    ledger: &dyn LedgerClient,
    wallet: Address,
    caller: Address,
    source_tx_hash: B256,
    window: u64,
) -> Result<bool, RelayError> {
    Ok(quorum_status(ledger, wallet, caller, source_tx_hash, window)
        .await?
        .reached())
}

/// Read back the withdrawal and every collected signature
pub async fn fetch_aggregated(
    ledger: &dyn LedgerClient,
    wallet: Address,
    caller: Address,
    source_tx_hash: B256,
) -> Result<AggregatedWithdrawal, RelayError> {
    let input = InterchainWallet::getAggregatedSignaturesCall {
        txHash: source_tx_hash,
    }
    .abi_encode();
    let output = ledger
        .call(caller, wallet, input.into())
        .await
        .map_err(|source| RelayError::Query {
            chain: ledger.chain(),
            what: "getAggregatedSignatures",
            source,
        })?;

    let ret = InterchainWallet::getAggregatedSignaturesCall::abi_decode_returns(&output, true)
        .map_err(|e| RelayError::Decode(format!("getAggregatedSignatures response: {}", e)))?;

    if ret.v.len() != ret.r.len() || ret.v.len() != ret.s.len() {
        return Err(RelayError::Decode(format!(
            "signature arrays differ in length: v={} r={} s={}",
            ret.v.len(),
            ret.r.len(),
            ret.s.len()
        )));
    }

    Ok(AggregatedWithdrawal {
        destination: ret.destination,
        value: ret.value,
        data: ret.data,
        v: ret.v,
        r: ret.r,
        s: ret.s,
    })
}

/// Transactions tracked by a default [`AttestationTally`]
pub const DEFAULT_TALLY_SIZE: usize = 100_000;

/// Running count of attestations per source transaction
///
/// Signers are not deduplicated; the wallet contract rejects a repeated
/// signature from the same sealer. When full, the transaction first seen
/// longest ago is dropped to make room.
#[derive(Debug)]
pub struct AttestationTally {
    attestations: HashMap<B256, Attestations>,
    max_size: usize,
    next_seq: u64,
}

#[derive(Debug)]
struct Attestations {
    first_seen: u64,
    signers: Vec<Address>,
}

impl AttestationTally {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_TALLY_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            attestations: HashMap::new(),
            max_size: max_size.max(1),
            next_seq: 0,
        }
    }

    /// Record one attestation and return the new count
    pub fn record(&mut self, source_tx_hash: B256, signer: Address) -> usize {
        if !self.attestations.contains_key(&source_tx_hash) {
            while self.attestations.len() >= self.max_size {
                let oldest = self
                    .attestations
                    .iter()
                    .min_by_key(|(_, a)| a.first_seen)
                    .map(|(h, _)| *h);
                match oldest {
                    Some(h) => {
                        debug!(source_tx_hash = %h, "Tally full, dropping oldest transaction");
                        self.attestations.remove(&h);
                    }
                    None => break,
                }
            }
            self.next_seq += 1;
        }

        let first_seen = self.next_seq;
        let entry = self
            .attestations
            .entry(source_tx_hash)
            .or_insert_with(|| Attestations {
                first_seen,
                signers: Vec::new(),
            });
        entry.signers.push(signer);
        entry.signers.len()
    }

    pub fn count(&self, source_tx_hash: &B256) -> usize {
        self.attestations
            .get(source_tx_hash)
            .map_or(0, |a| a.signers.len())
    }

    pub fn signers(&self, source_tx_hash: &B256) -> &[Address] {
        self.attestations
            .get(source_tx_hash)
            .map(|a| a.signers.as_slice())
            .unwrap_or_default()
    }

    pub fn reached(&self, source_tx_hash: &B256, threshold: u8) -> bool {
        QuorumStatus {
            count: self.count(source_tx_hash),
            threshold,
        }
        .reached()
    }

    /// Forget a transaction once it is settled
    pub fn remove(&mut self, source_tx_hash: &B256) -> Option<Vec<Address>> {
        self.attestations
            .remove(source_tx_hash)
            .map(|a| a.signers)
    }

    pub fn len(&self) -> usize {
        self.attestations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attestations.is_empty()
    }
}

impl Default for AttestationTally {
    fn default() -> Self {
        Self::new()
    }
}
