//! Canonical message hashing
//!
//! Sealers sign a digest that the wallet contracts recompute on-chain, so the
//! layout here must match the contract's `keccak256(abi.encodePacked(...))`
//! byte for byte:
//!
//! ```text
//! 0x19 ‖ version(1) ‖ contract(20) ‖ sourceTxHash(32) ‖ receiver(20) ‖ value(32) ‖ data
//! ```

use alloy::primitives::{Address, Bytes, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Current message format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Leading byte that keeps the message from parsing as an RLP transaction
const MESSAGE_PREFIX: u8 = 0x19;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// The six fields bound by a sealer signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage {
    pub contract: Address,
    pub source_tx_hash: B256,
    pub receiver: Address,
    pub value: U256,
    pub data: Bytes,
    pub version: u8,
}

impl CanonicalMessage {
    /// Packed byte encoding of the message
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 1 + 20 + 32 + 20 + 32 + self.data.len());
        buf.push(MESSAGE_PREFIX);
        buf.push(self.version);
        buf.extend_from_slice(self.contract.as_slice());
        buf.extend_from_slice(self.source_tx_hash.as_slice());
        buf.extend_from_slice(self.receiver.as_slice());
        buf.extend_from_slice(&self.value.to_be_bytes::<32>());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn digest(&self) -> B256 {
        B256::from(keccak256(&self.encode()))
    }
}

/// Compute the digest sealers sign for a withdrawal
pub fn compute_digest(
    contract: Address,
    source_tx_hash: B256,
    receiver: Address,
    value: U256,
    data: &[u8],
    version: u8,
) -> B256 {
    CanonicalMessage {
        contract,
        source_tx_hash,
        receiver,
        value,
        data: Bytes::copy_from_slice(data),
        version,
    }
    .digest()
}
