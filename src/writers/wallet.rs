//! Wallet contract writer
//!
//! Encodes wallet calls, submits them through a [`LedgerClient`] and waits
//! for the receipt. A reverted receipt or a receipt that never shows up is a
//! submission failure.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::SolCall;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::contracts::InterchainWallet;
use crate::error::{LedgerError, RelayError};
use crate::ledger::LedgerClient;
use crate::signer::Signature;
use crate::types::{AggregatedWithdrawal, Chain, DepositInfo};

const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A mined, successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// Writes to one wallet contract on one ledger
pub struct WalletWriter {
    ledger: Arc<dyn LedgerClient>,
    wallet: Address,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl WalletWriter {
    pub fn new(ledger: Arc<dyn LedgerClient>, wallet: Address, receipt_timeout: Duration) -> Self {
        Self {
            ledger,
            wallet,
            receipt_timeout,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn chain(&self) -> Chain {
        self.ledger.chain()
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    /// Mirror a deposit observed on the other chain
    pub async fn record_transfer(
        &self,
        deposit: &DepositInfo,
        data: Bytes,
    ) -> Result<Submitted, RelayError> {
        let call = InterchainWallet::recordTransferCall {
            txHash: deposit.source_tx_hash,
            receiver: deposit.event.receiver,
            value: deposit.event.value,
            data,
        };
        self.submit("recordTransfer", call.abi_encode().into()).await
    }

    /// Store this sealer's signature for a deposit
    pub async fn record_signature(
        &self,
        deposit: &DepositInfo,
        data: Bytes,
        signature: &Signature,
    ) -> Result<Submitted, RelayError> {
        let call = InterchainWallet::recordSignatureCall {
            txHash: deposit.source_tx_hash,
            receiver: deposit.event.receiver,
            value: deposit.event.value,
            data,
            v: signature.v,
            r: signature.r,
            s: signature.s,
        };
        self.submit("recordSignature", call.abi_encode().into()).await
    }

    /// Present the aggregated signatures to release funds
    pub async fn finalize_withdrawal(
        &self,
        source_tx_hash: B256,
        withdrawal: &AggregatedWithdrawal,
    ) -> Result<Submitted, RelayError> {
        let call = InterchainWallet::finalizeWithdrawalCall {
            txHash: source_tx_hash,
            destination: withdrawal.destination,
            value: withdrawal.value,
            data: withdrawal.data.clone(),
            v: withdrawal.v.clone(),
            r: withdrawal.r.clone(),
            s: withdrawal.s.clone(),
        };
        self.submit("finalizeWithdrawal", call.abi_encode().into())
            .await
    }

    /// Send `input` to the wallet and wait for its receipt
    pub async fn submit(&self, call: &'static str, input: Bytes) -> Result<Submitted, RelayError> {
        let chain = self.chain();
        let tx_hash = self
            .ledger
            .send_transaction(self.wallet, input)
            .await
            .map_err(|e| RelayError::Submission {
                chain,
                call,
                reason: e.to_string(),
            })?;

        debug!(chain = %chain, call, %tx_hash, "Submission sent, waiting for receipt");
        self.await_receipt(call, tx_hash).await
    }

    async fn await_receipt(&self, call: &'static str, tx_hash: B256) -> Result<Submitted, RelayError> {
        let chain = self.chain();
        let deadline = Instant::now() + self.receipt_timeout;

        loop {
            match self.ledger.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    info!(
                        chain = %chain,
                        call,
                        %tx_hash,
                        block = ?receipt.block_number,
                        "Submission confirmed"
                    );
                    return Ok(Submitted {
                        tx_hash,
                        block_number: receipt.block_number,
                    });
                }
                Ok(Some(receipt)) => {
                    return Err(RelayError::Submission {
                        chain,
                        call,
                        reason: format!(
                            "{} in block {:?}",
                            LedgerError::Reverted(tx_hash),
                            receipt.block_number
                        ),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    // A failed receipt read says nothing about the transaction
                    warn!(chain = %chain, call, %tx_hash, error = %e, "Receipt lookup failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(RelayError::Submission {
                    chain,
                    call,
                    reason: format!(
                        "no receipt for {} within {}s (timeout)",
                        tx_hash,
                        self.receipt_timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
