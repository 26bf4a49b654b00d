//! Sealer key loading
//!
//! The key is decrypted once at startup and kept in memory for the lifetime
//! of the process. Only the derived address is ever logged.

use std::io::{self, BufRead, Write};
use std::path::Path;

use alloy::signers::local::PrivateKeySigner;
use eyre::{eyre, Result, WrapErr};
use tracing::info;

use crate::config::KeySource;

pub fn load_sealer_key(source: &KeySource) -> Result<PrivateKeySigner> {
    let signer = match source {
        KeySource::Keystore { path, password } => {
            let password = match password {
                Some(p) => p.clone(),
                None => prompt_password(path)?,
            };
            decrypt_keystore(path, &password)?
        }
        KeySource::PrivateKey(raw) => parse_private_key(raw)?,
    };

    info!(sealer = %signer.address(), "Sealer key loaded");
    Ok(signer)
}

pub fn decrypt_keystore(path: &Path, password: &str) -> Result<PrivateKeySigner> {
    PrivateKeySigner::decrypt_keystore(path, password)
        .map_err(|e| eyre!("Failed to decrypt keystore {}: {}", path.display(), e))
}

/// Parse a hex private key, with or without 0x prefix
pub fn parse_private_key(raw: &str) -> Result<PrivateKeySigner> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .wrap_err("SEALER_PRIVATE_KEY is not hex encoded")?;
    PrivateKeySigner::from_slice(&bytes)
        .wrap_err("SEALER_PRIVATE_KEY is not a valid secp256k1 private key")
}

fn prompt_password(path: &Path) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "Passphrase for {}: ", path.display())?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .wrap_err("Failed to read keystore passphrase from stdin")?;

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
