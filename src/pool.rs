//! Pending transaction pool contract and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy_consensus::Transaction;
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::chain::ChainReader;
use crate::estimate::TX_GAS;
use crate::state::StateSnapshot;
use crate::types::RecoveredTx;

/// Minimum fee bump, in percent, for replacing a transaction with the same
/// sender and nonce.
pub const PRICE_BUMP_PERCENT: u128 = 10;

/// Reasons the pool refuses a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("already known")]
    AlreadyKnown,
    #[error("nonce too low: next nonce {state}, tx nonce {tx}")]
    NonceTooLow { state: u64, tx: u64 },
    #[error("invalid chain id: expected {expected}, got {got}")]
    InvalidChainId { expected: u64, got: u64 },
    #[error("intrinsic gas too low")]
    IntrinsicGas,
    #[error("exceeds block gas limit")]
    GasLimit,
    #[error("insufficient funds for gas * price + value: balance {balance}, tx cost {cost}")]
    InsufficientFunds { balance: U256, cost: U256 },
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,
}

/// Number of executable and future transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub pending: usize,
    pub queued: usize,
}

/// Pool transactions grouped by sender, then nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolContent {
    pub pending: BTreeMap<Address, BTreeMap<u64, RecoveredTx>>,
    pub queued: BTreeMap<Address, BTreeMap<u64, RecoveredTx>>,
}

/// The pending transaction set.
pub trait TxPool: Send + Sync {
    fn stats(&self) -> PoolStats;

    /// Next nonce for `address`, counting its gap-free pending transactions.
    fn nonce(&self, address: Address) -> u64;

    /// Validates and inserts a locally submitted transaction.
    fn add_local(&self, tx: RecoveredTx) -> Result<(), PoolError>;

    fn get_tx(&self, hash: B256) -> Option<RecoveredTx>;

    fn content(&self) -> PoolContent;
}

#[derive(Debug, Default)]
struct PoolData {
    by_hash: HashMap<B256, RecoveredTx>,
    by_sender: HashMap<Address, BTreeMap<u64, B256>>,
}

/// In-memory pool validating against the chain head.
pub struct MemoryPool {
    chain: Arc<dyn ChainReader>,
    inner: RwLock<PoolData>,
}

impl MemoryPool {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self {
            chain,
            inner: RwLock::new(PoolData::default()),
        }
    }

    fn head_state(&self) -> StateSnapshot {
        let head = self.chain.current_header();
        self.chain.state_at(head.hash()).unwrap_or_default()
    }

    fn validate(&self, tx: &RecoveredTx, state: &StateSnapshot) -> Result<(), PoolError> {
        let expected = self.chain.chain_id();
        if let Some(got) = tx.envelope().chain_id() {
            if got != expected {
                return Err(PoolError::InvalidChainId { expected, got });
            }
        }
        if tx.gas_limit() < TX_GAS {
            return Err(PoolError::IntrinsicGas);
        }
        if tx.gas_limit() > self.chain.current_header().gas_limit() {
            return Err(PoolError::GasLimit);
        }

        let state_nonce = state.nonce(tx.sender());
        if tx.nonce() < state_nonce {
            return Err(PoolError::NonceTooLow {
                state: state_nonce,
                tx: tx.nonce(),
            });
        }

        let balance = state.balance(tx.sender());
        let cost = U256::from(tx.gas_limit())
            .saturating_mul(U256::from(tx.max_fee_per_gas()))
            .saturating_add(tx.value());
        if balance < cost {
            return Err(PoolError::InsufficientFunds { balance, cost });
        }
        Ok(())
    }

    /// Splits a sender's transactions into gap-free pending and queued.
    /// Entries below the state nonce are already mined and skipped.
    fn classify<'a>(data: &'a PoolData, state: &StateSnapshot) -> Vec<(Address, bool, u64, &'a RecoveredTx)> {
        let mut rows = Vec::new();
        for (sender, nonces) in &data.by_sender {
            let mut next = state.nonce(*sender);
            for (&nonce, hash) in nonces.range(next..) {
                let Some(tx) = data.by_hash.get(hash) else {
                    continue;
                };
                let pending = nonce == next;
                if pending {
                    next += 1;
                }
                rows.push((*sender, pending, nonce, tx));
            }
        }
        rows
    }
}

impl TxPool for MemoryPool {
    fn stats(&self) -> PoolStats {
        let state = self.head_state();
        let data = self.inner.read();
        let mut stats = PoolStats::default();
        for (_, pending, _, _) in Self::classify(&data, &state) {
            if pending {
                stats.pending += 1;
            } else {
                stats.queued += 1;
            }
        }
        stats
    }

    fn nonce(&self, address: Address) -> u64 {
        let mut next = self.head_state().nonce(address);
        let data = self.inner.read();
        if let Some(nonces) = data.by_sender.get(&address) {
            while nonces.contains_key(&next) {
                next += 1;
            }
        }
        next
    }

    fn add_local(&self, tx: RecoveredTx) -> Result<(), PoolError> {
        let state = self.head_state();
        self.validate(&tx, &state)?;

        let mut data = self.inner.write();
        let hash = tx.hash();
        if data.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown);
        }

        let sender = tx.sender();
        let nonce = tx.nonce();
        let replaced = data.by_sender.get(&sender).and_then(|nonces| nonces.get(&nonce)).copied();
        if let Some(old_hash) = replaced {
            let old_fee = data
                .by_hash
                .get(&old_hash)
                .map(|old| old.max_fee_per_gas())
                .unwrap_or_default();
            let bumped = U256::from(old_fee) * U256::from(100 + PRICE_BUMP_PERCENT);
            if U256::from(tx.max_fee_per_gas()) * U256::from(100) < bumped {
                return Err(PoolError::ReplacementUnderpriced);
            }
            data.by_hash.remove(&old_hash);
            debug!(%old_hash, %hash, "Replaced pool transaction");
        }

        data.by_sender.entry(sender).or_default().insert(nonce, hash);
        data.by_hash.insert(hash, tx);
        debug!(%hash, %sender, nonce, "Added local transaction");
        Ok(())
    }

    fn get_tx(&self, hash: B256) -> Option<RecoveredTx> {
        self.inner.read().by_hash.get(&hash).cloned()
    }

    fn content(&self) -> PoolContent {
        let state = self.head_state();
        let data = self.inner.read();
        let mut content = PoolContent::default();
        for (sender, pending, nonce, tx) in Self::classify(&data, &state) {
            let bucket = if pending {
                &mut content.pending
            } else {
                &mut content.queued
            };
            bucket.entry(sender).or_default().insert(nonce, tx.clone());
        }
        content
    }
}
