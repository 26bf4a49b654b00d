//! Error taxonomy for the relay core
//!
//! Ledger adapters report [`LedgerError`]; the components wrap it into a
//! [`RelayError`] carrying the chain and the operation that failed. Which
//! variants are recovered locally and which abort a pipeline is decided by
//! the caller, see [`RelayError::is_fatal`].

use alloy::primitives::B256;
use thiserror::Error;

use crate::types::Chain;

/// Failure reported by a ledger client
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("no signer configured for submissions")]
    MissingSigner,
}

/// Relay errors, one variant per recovery policy
#[derive(Debug, Error)]
pub enum RelayError {
    /// The ledger endpoint cannot be reached at all
    #[error("cannot reach {chain} ledger: {reason}")]
    Connection { chain: Chain, reason: String },

    /// A single block, log range or receipt could not be read
    #[error("read of {context} on {chain} failed: {source}")]
    TransientRead {
        chain: Chain,
        context: String,
        #[source]
        source: LedgerError,
    },

    /// A log does not match the expected event shape
    #[error("cannot decode log: {0}")]
    Decode(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// A write was rejected (revert, nonce conflict, gas, receipt timeout)
    #[error("{call} on {chain} failed: {reason}")]
    Submission {
        chain: Chain,
        call: &'static str,
        reason: String,
    },

    /// A read-only contract query failed
    #[error("query {what} on {chain} failed: {source}")]
    Query {
        chain: Chain,
        what: &'static str,
        #[source]
        source: LedgerError,
    },
}

impl RelayError {
    /// Only a lost connection stops a pipeline; everything else drops a unit
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Connection { .. })
    }
}
