//! Self-contained development chain.
//!
//! A [`Devnet`] is a [`MemoryChain`] whose genesis funds a set of seeded
//! wallets, a [`MemoryPool`] on top of it and an execution engine. It can
//! build an [`EthApi`] over those parts and seal pool transactions into new
//! canonical blocks, which is all the binary, benches and integration tests
//! need.
//!
//! Sealing applies nonces, balances, value transfers and deployed code.
//! Storage writes made by contracts are not carried into the next block.

use std::sync::Arc;

use alloy_consensus::{Header, Transaction};
use alloy_primitives::{Address, B256, U256};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::EthApi;
use crate::chain::{ChainError, ChainReader, MemoryChain};
use crate::config::{ApiConfig, CanonicalPolicy, GWEI};
use crate::executor::{AbortSignal, ExecutionEngine, FeeFields, MessageContext, RevmEngine};
use crate::pool::{MemoryPool, TxPool};
use crate::signer::{Keystore, LocalWallet, Wallet};
use crate::simulate::Simulator;
use crate::state::{AccountState, StateSnapshot};
use crate::types::{Block, RecoveredTx, SealedHeader, StoredReceipt};

/// One ether in wei.
const ETHER: u128 = 1_000_000_000_000_000_000;

/// Parameters of a development chain.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    /// Number of funded wallets.
    pub num_accounts: usize,
    /// Wallet `i` is derived from `seed + i`.
    pub seed: u64,
    pub chain_id: u64,
    /// Genesis balance of every wallet, in wei.
    pub initial_balance: U256,
    pub gas_limit: u64,
    /// Genesis base fee; `None` builds a pre-fee-market chain.
    pub base_fee: Option<u64>,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            num_accounts: 10,
            seed: 42,
            chain_id: 1337,
            initial_balance: U256::from(1_000 * ETHER),
            gas_limit: 30_000_000,
            base_fee: Some(GWEI as u64),
        }
    }
}

#[derive(Debug, Error)]
pub enum DevnetError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("state of block {0} is not available")]
    MissingState(B256),
}

/// A funded in-memory chain with its pool and engine.
pub struct Devnet {
    config: DevnetConfig,
    wallets: Vec<LocalWallet>,
    chain: Arc<MemoryChain>,
    pool: Arc<MemoryPool>,
    engine: Arc<dyn ExecutionEngine>,
    simulator: Simulator,
}

impl Devnet {
    /// Builds the chain with a [`RevmEngine`].
    pub fn generate(config: DevnetConfig) -> Self {
        Self::with_engine(config, Arc::new(RevmEngine::default()))
    }

    pub fn with_engine(config: DevnetConfig, engine: Arc<dyn ExecutionEngine>) -> Self {
        let wallets: Vec<LocalWallet> = (0..config.num_accounts)
            .map(|i| LocalWallet::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();

        let alloc = StateSnapshot::from_accounts(
            wallets
                .iter()
                .map(|wallet| (wallet.address(), AccountState::with_balance(config.initial_balance))),
        );
        let genesis = Header {
            gas_limit: config.gas_limit,
            base_fee_per_gas: config.base_fee,
            ..Default::default()
        };
        let chain = Arc::new(MemoryChain::new(config.chain_id, genesis, alloc));
        let pool = Arc::new(MemoryPool::new(chain.clone()));
        let simulator = Simulator::new(chain.clone(), Arc::clone(&engine), CanonicalPolicy::Enforce);

        info!(
            accounts = wallets.len(),
            chain_id = config.chain_id,
            engine = engine.name(),
            "Generated dev chain"
        );
        Self {
            config,
            wallets,
            chain,
            pool,
            engine,
            simulator,
        }
    }

    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    pub fn wallets(&self) -> &[LocalWallet] {
        &self.wallets
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.wallets.iter().map(|wallet| wallet.address()).collect()
    }

    pub fn chain(&self) -> &Arc<MemoryChain> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Account manager holding every dev wallet.
    pub fn keystore(&self) -> Keystore {
        self.wallets.iter().cloned().collect()
    }

    /// API over this chain, its pool and engine. The chain id in `config` is
    /// replaced by the dev chain's.
    pub fn api(&self, config: ApiConfig) -> EthApi {
        let config = ApiConfig {
            chain_id: self.config.chain_id,
            ..config
        };
        EthApi::new(
            self.chain.clone(),
            self.pool.clone(),
            Arc::clone(&self.engine),
            Arc::new(self.keystore()),
            config,
        )
    }

    /// Seals every pending pool transaction into a new canonical block.
    pub fn seal_pending(&self) -> Result<SealedHeader, DevnetError> {
        let content = self.pool.content();
        let txs = content
            .pending
            .into_values()
            .flat_map(|by_nonce| by_nonce.into_values())
            .collect();
        self.seal_block(txs)
    }

    /// Executes `txs` in order on top of the head and appends the result as
    /// the new head. Transactions the engine rejects are left out.
    pub fn seal_block(&self, txs: Vec<RecoveredTx>) -> Result<SealedHeader, DevnetError> {
        let parent = self.chain.current_header();
        let mut state = self
            .chain
            .state_at(parent.hash())
            .ok_or(DevnetError::MissingState(parent.hash()))?;

        let mut header = parent.child();
        let block_ctx = self.simulator.block_context(&SealedHeader::seal(header.clone()));
        let base_fee = header.base_fee_per_gas;

        let mut included = Vec::with_capacity(txs.len());
        let mut receipts = Vec::with_capacity(txs.len());
        let mut cumulative_gas_used = 0u64;
        for tx in txs {
            let message = message_for(&tx);
            let outcome = match self.engine.execute(&block_ctx, &message, state.clone(), &AbortSignal::new()) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(hash = %tx.hash(), %err, "Dropping transaction from dev block");
                    continue;
                }
            };

            let sender = tx.sender();
            let success = !outcome.failed();
            let price = tx.effective_gas_price(base_fee);
            let fee = U256::from(outcome.gas_used).saturating_mul(U256::from(price));
            let mut debit = fee;
            let mut contract_address = None;

            state.set_nonce(sender, tx.nonce() + 1);
            if success {
                debit = debit.saturating_add(tx.value());
                let recipient = match tx.to() {
                    Some(to) => to,
                    None => {
                        let created = sender.create(tx.nonce());
                        state.set_code(created, outcome.return_data.clone());
                        contract_address = Some(created);
                        created
                    }
                };
                // Credit after the debit so self-transfers net out.
                state.set_balance(sender, state.balance(sender).saturating_sub(debit));
                state.set_balance(recipient, state.balance(recipient).saturating_add(tx.value()));
            } else {
                state.set_balance(sender, state.balance(sender).saturating_sub(debit));
            }

            cumulative_gas_used += outcome.gas_used;
            receipts.push(StoredReceipt {
                success,
                gas_used: outcome.gas_used,
                cumulative_gas_used,
                contract_address,
                logs: Vec::new(),
            });
            included.push(tx);
        }

        header.gas_used = cumulative_gas_used;
        let sealed = SealedHeader::seal(header);
        let block = Block {
            header: sealed.clone(),
            transactions: included,
        };
        let txs = block.transactions.len();
        self.chain.insert_block(block, receipts, state, true)?;
        info!(number = sealed.number(), hash = %sealed.hash(), txs, gas_used = cumulative_gas_used, "Sealed dev block");
        Ok(sealed)
    }
}

/// Execution message equivalent to a signed transaction.
fn message_for(tx: &RecoveredTx) -> MessageContext {
    let envelope = tx.envelope();
    let fees = if envelope.is_dynamic_fee() {
        FeeFields::Dynamic {
            max_fee_per_gas: envelope.max_fee_per_gas(),
            max_priority_fee_per_gas: envelope.max_priority_fee_per_gas().unwrap_or_default(),
        }
    } else {
        FeeFields::Legacy {
            gas_price: envelope.gas_price().unwrap_or_default(),
        }
    };
    MessageContext {
        caller: tx.sender(),
        to: tx.to(),
        value: tx.value(),
        input: envelope.input().clone(),
        gas_limit: tx.gas_limit(),
        fees,
        nonce: Some(tx.nonce()),
    }
}
