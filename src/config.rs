//! Relay node configuration
//!
//! Read from environment variables, optionally seeded from a `.env` file.
//! Secrets are kept out of the `Debug` output.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::types::Chain;

const DEFAULT_SCAN_WINDOW_BLOCKS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_SUBMISSION_QUEUE_SIZE: usize = 256;
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 60;

/// Main configuration for the relay node
#[derive(Debug, Clone)]
pub struct Config {
    pub main_chain: ChainConfig,
    pub side_chain: ChainConfig,
    pub sealer_key: KeySource,
    pub pipelines: PipelineConfig,
    pub scan: ScanConfig,
    pub submission: SubmissionConfig,
    /// Overall run deadline, `None` runs until a shutdown signal
    pub deadline: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

/// One ledger endpoint and the wallet deployed on it
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub wallet: Address,
}

/// Where the sealer key comes from
#[derive(Clone)]
pub enum KeySource {
    /// Encrypted JSON key file; the password is prompted for when absent
    Keystore {
        path: PathBuf,
        password: Option<String>,
    },
    /// Raw hex private key, for development networks
    PrivateKey(String),
}

/// Custom Debug that redacts key material to prevent accidental log leakage.
impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Keystore { path, password } => f
                .debug_struct("Keystore")
                .field("path", path)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            KeySource::PrivateKey(_) => f.debug_tuple("PrivateKey").field(&"<redacted>").finish(),
        }
    }
}

/// Which pipelines run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Mirror main chain deposits onto the side chain wallet
    pub watch_main_chain: bool,
    /// Attest side chain deposits on the side chain wallet
    pub watch_side_chain: bool,
    /// Forward fully attested withdrawals to the main chain
    pub aggregate_signatures: bool,
}

/// Block range and polling behaviour shared by every watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub start_block: u64,
    pub end_block: Option<u64>,
    /// Keep polling for new blocks once caught up
    pub follow: bool,
    /// Blocks behind the head considered final
    pub finality_blocks: u64,
    pub window_blocks: u64,
    pub poll_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            end_block: None,
            follow: true,
            finality_blocks: 0,
            window_blocks: DEFAULT_SCAN_WINDOW_BLOCKS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub queue_size: usize,
    /// Retries per submission, 0 drops a failed job immediately
    pub max_retries: u32,
    pub receipt_timeout: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_SUBMISSION_QUEUE_SIZE,
            max_retries: 0,
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| eyre!("{} environment variable is required", key))
        };

        let main_chain = ChainConfig {
            chain: Chain::Main,
            rpc_url: required("MAIN_CHAIN_RPC_URL")?,
            wallet: parse_address("MAIN_CHAIN_WALLET", &required("MAIN_CHAIN_WALLET")?)?,
        };
        let side_chain = ChainConfig {
            chain: Chain::Side,
            rpc_url: required("SIDE_CHAIN_RPC_URL")?,
            wallet: parse_address("SIDE_CHAIN_WALLET", &required("SIDE_CHAIN_WALLET")?)?,
        };

        let keystore = lookup("SEALER_KEYSTORE_PATH").filter(|v| !v.is_empty());
        let private_key = lookup("SEALER_PRIVATE_KEY").filter(|v| !v.is_empty());
        let sealer_key = match (keystore, private_key) {
            (Some(path), None) => KeySource::Keystore {
                path: PathBuf::from(path),
                password: lookup("SEALER_KEYSTORE_PASSWORD"),
            },
            (None, Some(key)) => KeySource::PrivateKey(key),
            (Some(_), Some(_)) => {
                return Err(eyre!(
                    "Set only one of SEALER_KEYSTORE_PATH and SEALER_PRIVATE_KEY"
                ))
            }
            (None, None) => {
                return Err(eyre!(
                    "SEALER_KEYSTORE_PATH or SEALER_PRIVATE_KEY environment variable is required"
                ))
            }
        };

        let watch_main = parse_opt::<bool>(&lookup, "WATCH_MAIN_CHAIN")?;
        let watch_side = parse_opt::<bool>(&lookup, "WATCH_SIDE_CHAIN")?;
        let (watch_main_chain, watch_side_chain) = match (watch_main, watch_side) {
            (None, None) => (true, true),
            (main, side) => (main.unwrap_or(false), side.unwrap_or(false)),
        };
        let pipelines = PipelineConfig {
            watch_main_chain,
            watch_side_chain,
            aggregate_signatures: parse_opt(&lookup, "AGGREGATE_SIGNATURES")?
                .unwrap_or(watch_side_chain),
        };

        let defaults = ScanConfig::default();
        let scan = ScanConfig {
            start_block: parse_opt(&lookup, "START_BLOCK")?.unwrap_or(defaults.start_block),
            end_block: parse_opt(&lookup, "END_BLOCK")?,
            follow: parse_opt(&lookup, "FOLLOW")?.unwrap_or(defaults.follow),
            finality_blocks: parse_opt(&lookup, "FINALITY_BLOCKS")?
                .unwrap_or(defaults.finality_blocks),
            window_blocks: parse_opt(&lookup, "SCAN_WINDOW_BLOCKS")?
                .unwrap_or(defaults.window_blocks),
            poll_interval: parse_opt(&lookup, "POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        };

        let submission_defaults = SubmissionConfig::default();
        let submission = SubmissionConfig {
            queue_size: parse_opt(&lookup, "SUBMISSION_QUEUE_SIZE")?
                .unwrap_or(submission_defaults.queue_size),
            max_retries: parse_opt(&lookup, "SUBMISSION_MAX_RETRIES")?
                .unwrap_or(submission_defaults.max_retries),
            receipt_timeout: parse_opt(&lookup, "RECEIPT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(submission_defaults.receipt_timeout),
        };

        let config = Self {
            main_chain,
            side_chain,
            sealer_key,
            pipelines,
            scan,
            submission,
            deadline: parse_opt(&lookup, "DEADLINE_SECS")?.map(Duration::from_secs),
            metrics_port: parse_opt(&lookup, "METRICS_PORT")?,
            log_format: parse_opt(&lookup, "LOG_FORMAT")?.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for chain in [&self.main_chain, &self.side_chain] {
            if !chain.rpc_url.starts_with("http://") && !chain.rpc_url.starts_with("https://") {
                return Err(eyre!(
                    "{} RPC URL must start with http:// or https://",
                    chain.chain
                ));
            }
            if chain.wallet == Address::ZERO {
                return Err(eyre!("{} wallet address cannot be zero", chain.chain));
            }
        }

        if self.scan.window_blocks == 0 {
            return Err(eyre!("SCAN_WINDOW_BLOCKS must be at least 1"));
        }
        if let Some(end) = self.scan.end_block {
            if end < self.scan.start_block {
                return Err(eyre!(
                    "END_BLOCK ({}) is before START_BLOCK ({})",
                    end,
                    self.scan.start_block
                ));
            }
        }
        if self.submission.queue_size == 0 {
            return Err(eyre!("SUBMISSION_QUEUE_SIZE must be at least 1"));
        }
        if !self.pipelines.watch_main_chain
            && !self.pipelines.watch_side_chain
            && !self.pipelines.aggregate_signatures
        {
            return Err(eyre!("No pipeline enabled, nothing to do"));
        }

        Ok(())
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).wrap_err_with(|| format!("{} must be a 0x address", key))
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} has invalid value '{}': {}", key, raw, e)),
    }
}
