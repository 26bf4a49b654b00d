//! Simulated ledgers for pipeline tests
//!
//! [`SimChain`] is an in-memory ledger hosting wallet contracts with the
//! same ABI and rules as the deployed ones: owners vote on mirrored
//! transfers, signatures are checked with ecrecover, withdrawals need
//! `threshold` distinct owner signatures and nothing executes twice.
//! [`SimLedger`] is a client handle onto a chain, optionally able to sign.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolEvent, SolInterface};
use async_trait::async_trait;

use interchain_relay::contracts::InterchainWallet::{self, InterchainWalletCalls};
use interchain_relay::hash::{compute_digest, keccak256, PROTOCOL_VERSION};
use interchain_relay::ledger::{LedgerClient, LedgerLog, LogFilter, ReceiptStatus};
use interchain_relay::signer::{recover_signer, Signature};
use interchain_relay::{Chain, LedgerError};

/// Flat fee charged to users for a deposit transaction
pub const GAS_FEE: u64 = 21_000 * 1_000_000_000;

/// Well-known development accounts
pub const SEALER1_KEY: &str = "148435bc1bc5ee5ab6f57745625d6c3e15e99b335f29ba75a8542546fd2e2dc4";
pub const SEALER2_KEY: &str = "ae6ae8e5ccbfb04590405997ee2d52d2b330726137b875053c36d94e974d162f";

pub fn key(hex: &str) -> PrivateKeySigner {
    hex.parse().unwrap()
}

struct SimWallet {
    owners: Vec<Address>,
    threshold: u8,
    /// Wallet on the other chain, bound into withdrawal digests
    peer: Address,
    transfer_votes: HashMap<B256, Vec<Address>>,
    executed: HashSet<B256>,
    withdrawals: HashMap<B256, PendingWithdrawal>,
}

#[derive(Clone)]
struct PendingWithdrawal {
    receiver: Address,
    value: U256,
    data: Bytes,
    signatures: Vec<(Address, Signature)>,
}

#[derive(Default)]
struct ChainState {
    block: u64,
    tx_counter: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    logs: Vec<LedgerLog>,
    receipts: HashMap<B256, ReceiptStatus>,
    wallets: HashMap<Address, SimWallet>,
    failing_blocks: HashSet<u64>,
}

impl ChainState {
    fn balance(&self, who: &Address) -> U256 {
        self.balances.get(who).copied().unwrap_or_default()
    }

    fn debit(&mut self, who: Address, amount: U256) -> Result<(), String> {
        let balance = self.balance(&who);
        if balance < amount {
            return Err("insufficient funds".to_string());
        }
        self.balances.insert(who, balance - amount);
        Ok(())
    }

    fn credit(&mut self, who: Address, amount: U256) {
        let balance = self.balance(&who);
        self.balances.insert(who, balance + amount);
    }

    /// Mine a block holding one transaction
    fn mine(&mut self, from: Address) -> (u64, B256) {
        self.block += 1;
        self.tx_counter += 1;
        *self.nonces.entry(from).or_default() += 1;
        let mut seed = from.to_vec();
        seed.extend_from_slice(&self.tx_counter.to_be_bytes());
        (self.block, B256::from(keccak256(&seed)))
    }

    fn emit<E: SolEvent>(&mut self, wallet: Address, event: &E, block: u64, tx_hash: B256) {
        let log = event.encode_log_data();
        self.logs.push(LedgerLog {
            address: wallet,
            topics: log.topics().to_vec(),
            data: log.data.clone(),
            block_number: Some(block),
            transaction_hash: Some(tx_hash),
            log_index: Some(self.logs.len() as u64),
        });
    }
}

/// One simulated ledger
#[derive(Clone)]
pub struct SimChain {
    chain: Chain,
    state: Arc<Mutex<ChainState>>,
}

impl SimChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            state: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    pub fn fund(&self, who: Address, amount: U256) {
        self.state.lock().unwrap().credit(who, amount);
    }

    pub fn balance(&self, who: Address) -> U256 {
        self.state.lock().unwrap().balance(&who)
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().block
    }

    pub fn deploy_wallet(
        &self,
        wallet: Address,
        owners: Vec<Address>,
        threshold: u8,
        peer: Address,
        funds: U256,
    ) {
        let mut state = self.state.lock().unwrap();
        state.wallets.insert(
            wallet,
            SimWallet {
                owners,
                threshold,
                peer,
                transfer_votes: HashMap::new(),
                executed: HashSet::new(),
                withdrawals: HashMap::new(),
            },
        );
        state.credit(wallet, funds);
    }

    /// A user sends `value` to the wallet for `receiver` on the other chain
    pub fn deposit(&self, from: Address, wallet: Address, receiver: Address, value: U256) -> B256 {
        let mut state = self.state.lock().unwrap();
        state
            .debit(from, value + U256::from(GAS_FEE))
            .expect("depositor has funds");
        state.credit(wallet, value);
        let (block, tx_hash) = state.mine(from);
        state.emit(
            wallet,
            &InterchainWallet::Deposit {
                sender: from,
                receiver,
                value,
            },
            block,
            tx_hash,
        );
        state.receipts.insert(
            tx_hash,
            ReceiptStatus {
                success: true,
                block_number: Some(block),
            },
        );
        tx_hash
    }

    /// Mine empty blocks
    pub fn advance(&self, blocks: u64) {
        self.state.lock().unwrap().block += blocks;
    }

    /// Make log queries touching `block` fail
    pub fn fail_block(&self, block: u64) {
        self.state.lock().unwrap().failing_blocks.insert(block);
    }

    pub fn is_executed(&self, wallet: Address, tx: B256) -> bool {
        self.state
            .lock()
            .unwrap()
            .wallets
            .get(&wallet)
            .is_some_and(|w| w.executed.contains(&tx))
    }

    /// Read-only client
    pub fn client(&self) -> Arc<SimLedger> {
        Arc::new(SimLedger {
            chain: self.chain,
            state: self.state.clone(),
            signer: None,
        })
    }

    /// Client submitting transactions as `signer`
    pub fn signing_client(&self, signer: PrivateKeySigner) -> Arc<SimLedger> {
        Arc::new(SimLedger {
            chain: self.chain,
            state: self.state.clone(),
            signer: Some(signer),
        })
    }
}

pub struct SimLedger {
    chain: Chain,
    state: Arc<Mutex<ChainState>>,
    signer: Option<PrivateKeySigner>,
}

fn revert(reason: &str) -> LedgerError {
    LedgerError::Transport(format!("execution reverted: {}", reason))
}

#[async_trait]
impl LedgerClient for SimLedger {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LedgerLog>, LedgerError> {
        let state = self.state.lock().unwrap();
        if (filter.from_block..=filter.to_block).any(|b| state.failing_blocks.contains(&b)) {
            return Err(LedgerError::Transport("connection reset".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| l.address == filter.address)
            .filter(|l| {
                l.block_number
                    .is_some_and(|b| b >= filter.from_block && b <= filter.to_block)
            })
            .filter(|l| filter.event_signature.map_or(true, |sig| l.topics.first() == Some(&sig)))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<ReceiptStatus>, LedgerError> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).copied())
    }

    async fn nonce(&self, account: Address) -> Result<u64, LedgerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, _from: Address, to: Address, input: Bytes) -> Result<Bytes, LedgerError> {
        let state = self.state.lock().unwrap();
        let wallet = state.wallets.get(&to).ok_or_else(|| revert("no contract"))?;

        match InterchainWalletCalls::abi_decode(&input, true).map_err(|e| revert(&e.to_string()))? {
            InterchainWalletCalls::requiredThreshold(_) => Ok(
                InterchainWallet::requiredThresholdCall::abi_encode_returns(&(wallet.threshold,))
                    .into(),
            ),
            InterchainWalletCalls::getAggregatedSignatures(call) => {
                let pending = wallet
                    .withdrawals
                    .get(&call.txHash)
                    .ok_or_else(|| revert("unknown withdrawal"))?;
                Ok(
                    InterchainWallet::getAggregatedSignaturesCall::abi_encode_returns(&(
                        pending.receiver,
                        pending.value,
                        pending.data.clone(),
                        pending.signatures.iter().map(|(_, s)| s.v).collect::<Vec<u8>>(),
                        pending.signatures.iter().map(|(_, s)| s.r).collect::<Vec<B256>>(),
                        pending.signatures.iter().map(|(_, s)| s.s).collect::<Vec<B256>>(),
                    ))
                    .into(),
                )
            }
            _ => Err(revert("not a view function")),
        }
    }

    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<B256, LedgerError> {
        let signer = self.signer.as_ref().ok_or(LedgerError::MissingSigner)?;
        let from = signer.address();
        let call = InterchainWalletCalls::abi_decode(&input, true).map_err(|e| revert(&e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        let outcome = execute(&mut state, from, to, call).map_err(|r| revert(&r))?;

        let (block, tx_hash) = state.mine(from);
        for event in outcome {
            match event {
                WalletEvent::SignatureAdded(e) => state.emit(to, &e, block, tx_hash),
            }
        }
        state.receipts.insert(
            tx_hash,
            ReceiptStatus {
                success: true,
                block_number: Some(block),
            },
        );
        Ok(tx_hash)
    }
}

enum WalletEvent {
    SignatureAdded(InterchainWallet::SignatureAdded),
}

fn execute(
    state: &mut ChainState,
    from: Address,
    to: Address,
    call: InterchainWalletCalls,
) -> Result<Vec<WalletEvent>, String> {
    let wallet = state.wallets.get_mut(&to).ok_or("no contract")?;
    if !wallet.owners.contains(&from) {
        return Err("caller is not an owner".to_string());
    }

    match call {
        InterchainWalletCalls::recordTransfer(c) => {
            if wallet.executed.contains(&c.txHash) {
                return Err("already executed".to_string());
            }
            let votes = wallet.transfer_votes.entry(c.txHash).or_default();
            if votes.contains(&from) {
                return Err("already confirmed".to_string());
            }
            votes.push(from);
            if votes.len() == usize::from(wallet.threshold) {
                wallet.executed.insert(c.txHash);
                state.debit(to, c.value)?;
                state.credit(c.receiver, c.value);
            }
            Ok(vec![])
        }
        InterchainWalletCalls::recordSignature(c) => {
            let digest = compute_digest(to, c.txHash, c.receiver, c.value, &c.data, PROTOCOL_VERSION);
            let signature = Signature {
                v: c.v,
                r: c.r,
                s: c.s,
            };
            let signer = recover_signer(digest, &signature).map_err(|e| e.to_string())?;
            if !wallet.owners.contains(&signer) {
                return Err("invalid signature".to_string());
            }
            let pending = wallet
                .withdrawals
                .entry(c.txHash)
                .or_insert_with(|| PendingWithdrawal {
                    receiver: c.receiver,
                    value: c.value,
                    data: c.data.clone(),
                    signatures: Vec::new(),
                });
            if pending.receiver != c.receiver || pending.value != c.value {
                return Err("conflicting withdrawal".to_string());
            }
            if pending.signatures.iter().any(|(s, _)| *s == signer) {
                return Err("already signed".to_string());
            }
            pending.signatures.push((signer, signature));
            Ok(vec![WalletEvent::SignatureAdded(
                InterchainWallet::SignatureAdded {
                    txHash: c.txHash,
                    signer,
                },
            )])
        }
        InterchainWalletCalls::finalizeWithdrawal(c) => {
            if wallet.executed.contains(&c.txHash) {
                return Err("already executed".to_string());
            }
            if c.v.len() != c.r.len() || c.v.len() != c.s.len() {
                return Err("invalid parameters".to_string());
            }
            let digest = compute_digest(
                wallet.peer,
                c.txHash,
                c.destination,
                c.value,
                &c.data,
                PROTOCOL_VERSION,
            );
            let mut signers = HashSet::new();
            for i in 0..c.v.len() {
                let signature = Signature {
                    v: c.v[i],
                    r: c.r[i],
                    s: c.s[i],
                };
                let signer = recover_signer(digest, &signature).map_err(|e| e.to_string())?;
                if !wallet.owners.contains(&signer) {
                    return Err("invalid signature".to_string());
                }
                signers.insert(signer);
            }
            if signers.len() < usize::from(wallet.threshold) {
                return Err("not enough signatures".to_string());
            }
            wallet.executed.insert(c.txHash);
            state.debit(to, c.value)?;
            state.credit(c.destination, c.value);
            Ok(vec![])
        }
        _ => Err("not a transaction".to_string()),
    }
}

/// A main chain and a side chain with a wallet deployed on each
pub struct Bridge {
    pub main: SimChain,
    pub side: SimChain,
    pub main_wallet: Address,
    pub side_wallet: Address,
    pub sealers: Vec<PrivateKeySigner>,
}

impl Bridge {
    /// Two sealers, threshold 2, both wallets funded with `liquidity`
    pub fn new(liquidity: U256) -> Self {
        let main = SimChain::new(Chain::Main);
        let side = SimChain::new(Chain::Side);
        let main_wallet = Address::repeat_byte(0xa1);
        let side_wallet = Address::repeat_byte(0xb2);
        let sealers = vec![key(SEALER1_KEY), key(SEALER2_KEY)];
        let owners: Vec<Address> = sealers.iter().map(|s| s.address()).collect();

        main.deploy_wallet(main_wallet, owners.clone(), 2, side_wallet, liquidity);
        side.deploy_wallet(side_wallet, owners, 2, main_wallet, liquidity);

        Self {
            main,
            side,
            main_wallet,
            side_wallet,
            sealers,
        }
    }
}
