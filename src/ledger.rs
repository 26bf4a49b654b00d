//! Ledger client interface
//!
//! The relay core only needs a handful of ledger operations. They are kept
//! behind [`LedgerClient`] so the pipelines can run against any backend;
//! [`EvmLedger`] is the JSON-RPC implementation used by the node.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{LedgerError, RelayError};
use crate::types::Chain;

/// Log query: one contract, an inclusive block range, optionally one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub event_signature: Option<B256>,
}

impl LogFilter {
    pub fn new(address: Address, from_block: u64, to_block: u64) -> Self {
        Self {
            address,
            from_block,
            to_block,
            event_signature: None,
        }
    }

    pub fn event(mut self, signature: B256) -> Self {
        self.event_signature = Some(signature);
        self
    }

    /// Same filter narrowed to a single block
    pub fn single_block(&self, block: u64) -> Self {
        Self {
            from_block: block,
            to_block: block,
            ..*self
        }
    }
}

/// Raw log entry as returned by the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl From<Log> for LedgerLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Operations the relay needs from a ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Which ledger this client talks to, for log context
    fn chain(&self) -> Chain;

    async fn latest_block(&self) -> Result<u64, LedgerError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LedgerLog>, LedgerError>;

    /// `None` while the transaction is not mined yet
    async fn transaction_receipt(&self, tx_hash: B256)
        -> Result<Option<ReceiptStatus>, LedgerError>;

    async fn nonce(&self, account: Address) -> Result<u64, LedgerError>;

    /// Read-only contract call made on behalf of `from`
    async fn call(&self, from: Address, to: Address, input: Bytes) -> Result<Bytes, LedgerError>;

    /// Sign and submit a transaction, returning its hash without waiting
    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<B256, LedgerError>;
}

fn transport(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

/// JSON-RPC ledger client backed by alloy
pub struct EvmLedger {
    chain: Chain,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    signer: Option<PrivateKeySigner>,
}

impl EvmLedger {
    /// Connect to an endpoint and check it answers
    pub async fn connect(
        chain: Chain,
        rpc_url: &str,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Self, RelayError> {
        let url = rpc_url.parse().map_err(|e| RelayError::Connection {
            chain,
            reason: format!("invalid RPC URL {}: {}", rpc_url, e),
        })?;
        let provider = ProviderBuilder::new().on_http(url);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| RelayError::Connection {
                chain,
                reason: e.to_string(),
            })?;

        info!(
            chain = %chain,
            chain_id,
            rpc_url = %rpc_url,
            sender = ?signer.as_ref().map(|s| s.address()),
            "Connected to ledger"
        );

        Ok(Self {
            chain,
            rpc_url: rpc_url.to_string(),
            provider,
            signer,
        })
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        self.provider.get_block_number().await.map_err(transport)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LedgerLog>, LedgerError> {
        let mut rpc_filter = Filter::new()
            .address(filter.address)
            .from_block(filter.from_block)
            .to_block(filter.to_block);
        if let Some(signature) = filter.event_signature {
            rpc_filter = rpc_filter.event_signature(signature);
        }

        let logs = self
            .provider
            .get_logs(&rpc_filter)
            .await
            .map_err(transport)?;

        Ok(logs.into_iter().map(LedgerLog::from).collect())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<ReceiptStatus>, LedgerError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(transport)?;

        Ok(receipt.map(|r| ReceiptStatus {
            success: r.status(),
            block_number: r.block_number,
        }))
    }

    async fn nonce(&self, account: Address) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(account)
            .await
            .map_err(transport)
    }

    async fn call(&self, from: Address, to: Address, input: Bytes) -> Result<Bytes, LedgerError> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(input);

        self.provider.call(&tx).await.map_err(transport)
    }

    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<B256, LedgerError> {
        let signer = self.signer.clone().ok_or(LedgerError::MissingSigner)?;
        let from = signer.address();
        let nonce = self.nonce(from).await?;

        // Build provider with signer
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().map_err(transport)?);

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_nonce(nonce)
            .with_input(input);

        let pending = provider.send_transaction(tx).await.map_err(transport)?;
        let tx_hash = *pending.tx_hash();

        debug!(chain = %self.chain, %tx_hash, nonce, "Transaction sent");
        Ok(tx_hash)
    }
}
