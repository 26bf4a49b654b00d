//! Sealer signatures
//!
//! Wraps alloy's `PrivateKeySigner` to produce recoverable secp256k1
//! signatures over a canonical digest and splits them into the `(v, r, s)`
//! triple the wallet contracts take as arguments.

use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Length of a raw `r ‖ s ‖ recovery_id` signature
pub const RAW_SIGNATURE_LEN: usize = 65;

/// Offset added to the raw recovery id
const V_OFFSET: u8 = 27;

/// Wire form of a sealer signature, `v` is 27 or 28
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// Split a 65-byte `r ‖ s ‖ recovery_id` signature into `(v, r, s)`
pub fn parse_signature(raw: &[u8]) -> Result<Signature, RelayError> {
    if raw.len() != RAW_SIGNATURE_LEN {
        return Err(RelayError::MalformedSignature(format!(
            "expected {} bytes, got {}",
            RAW_SIGNATURE_LEN,
            raw.len()
        )));
    }

    let recovery_id = raw[64];
    if recovery_id > 1 {
        return Err(RelayError::MalformedSignature(format!(
            "recovery id {} out of range",
            recovery_id
        )));
    }

    Ok(Signature {
        v: recovery_id + V_OFFSET,
        r: B256::from_slice(&raw[0..32]),
        s: B256::from_slice(&raw[32..64]),
    })
}

/// Sign a digest with the sealer key
pub fn sign(digest: B256, key: &PrivateKeySigner) -> Result<Signature, RelayError> {
    let sig = key
        .sign_hash_sync(&digest)
        .map_err(|e| RelayError::Signing(e.to_string()))?;

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    raw[0..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
    raw[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
    raw[64] = u8::from(sig.v());

    parse_signature(&raw)
}

/// Recover the address that produced `signature` over `digest`
pub fn recover_signer(digest: B256, signature: &Signature) -> Result<Address, RelayError> {
    let y_parity = match signature.v {
        27 => false,
        28 => true,
        other => {
            return Err(RelayError::MalformedSignature(format!(
                "v must be 27 or 28, got {}",
                other
            )))
        }
    };

    PrimitiveSignature::new(
        U256::from_be_slice(signature.r.as_slice()),
        U256::from_be_slice(signature.s.as_slice()),
        y_parity,
    )
    .recover_address_from_prehash(&digest)
    .map_err(|e| RelayError::MalformedSignature(e.to_string()))
}
