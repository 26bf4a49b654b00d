//! Common types carried through the relay pipelines

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two bridged ledgers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Main,
    Side,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Main => "mainchain",
            Chain::Side => "sidechain",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay direction, named after the chain a deposit is observed on
///
/// - `MainToSide`: the main chain wallet already custodies the funds, so the
///   side chain wallet mirrors the transfer without sealer signatures.
/// - `SideToMain`: sealers attest on the side chain wallet; once quorum is
///   reached the aggregated signatures release funds on the main chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    MainToSide,
    SideToMain,
}

impl Direction {
    /// Short tag used in every log line of a pipeline
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::MainToSide => "mc2sc",
            Direction::SideToMain => "sc2mc",
        }
    }

    /// Chain whose wallet emits the deposits this direction relays
    pub fn source(&self) -> Chain {
        match self {
            Direction::MainToSide => Chain::Main,
            Direction::SideToMain => Chain::Side,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decoded `Deposit(sender, receiver, value)` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub sender: Address,
    pub receiver: Address,
    pub value: U256,
}

/// A deposit paired with the transaction that emitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInfo {
    pub event: DepositEvent,
    pub source_tx_hash: B256,
    /// Block the log was included in, when the ledger reports it
    pub block_number: Option<u64>,
}

/// Decoded `SignatureAdded(txHash, signer)` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub source_tx_hash: B256,
    pub signer: Address,
    pub block_number: Option<u64>,
}

/// Aggregated withdrawal as returned by `getAggregatedSignatures`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedWithdrawal {
    pub destination: Address,
    pub value: U256,
    pub data: alloy::primitives::Bytes,
    pub v: Vec<u8>,
    pub r: Vec<B256>,
    pub s: Vec<B256>,
}

impl AggregatedWithdrawal {
    /// Number of collected (v, r, s) triples
    pub fn signature_count(&self) -> usize {
        self.v.len()
    }
}
