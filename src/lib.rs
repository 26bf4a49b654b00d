//! Interchain Relay - Library interface
//!
//! Relay core of a two-chain asset bridge: watches wallet deposits on a main
//! chain and a side chain, mirrors or attests them, and forwards withdrawals
//! once enough sealers have signed. Modules are re-exported for the binary
//! and for integration tests.

pub mod api;
pub mod bounded_cache;
pub mod config;
pub mod contracts;
pub mod error;
pub mod hash;
pub mod keys;
pub mod ledger;
pub mod metrics;
pub mod quorum;
pub mod scanner;
pub mod signer;
pub mod types;
pub mod watchers;
pub mod writers;

pub use error::{LedgerError, RelayError};
pub use types::{Chain, DepositEvent, DepositInfo, Direction};
