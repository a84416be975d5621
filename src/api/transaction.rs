//! Nonces, submissions, receipts and transaction lookups.

use alloy_consensus::{TxEip1559, TxLegacy};
use alloy_primitives::{Address, TxKind, B256};
use tracing::debug;

use super::EthApi;
use crate::error::ApiError;
use crate::resolver;
use crate::rpc_types::{RpcReceipt, RpcTransaction};
use crate::signer::UnsignedTx;
use crate::submit::{decode_raw_transaction, submit_transaction};
use crate::types::{BlockReference, CallMessage, RecoveredTx, TxLocation};

/// Pricing chosen for a locally signed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pricing {
    Legacy { gas_price: u128 },
    Dynamic { max_fee: u128, tip: u128 },
}

impl EthApi {
    /// Next nonce of `address`. `pending` counts pool transactions, any other
    /// reference reads the nonce from that block's state.
    pub fn get_transaction_count(&self, address: Address, reference: &BlockReference) -> Result<u64, ApiError> {
        if reference.is_pending() {
            return Ok(self.pool.nonce(address));
        }
        self.state_nonce(address, reference)
    }

    /// Addresses this node can sign for.
    pub fn accounts(&self) -> Vec<Address> {
        self.accounts.accounts()
    }

    /// Decodes signed EIP-2718 bytes and submits them. Raw submissions never
    /// take the sender's nonce lock.
    pub fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ApiError> {
        let tx = decode_raw_transaction(raw)?;
        submit_transaction(self.pool.as_ref(), tx, self.config.tx_fee_cap)
    }

    /// Fills in missing fields, signs with the sender's local key and submits.
    ///
    /// The sender's nonce lock is held from nonce selection until the pool
    /// has accepted or refused the transaction.
    pub async fn send_transaction(&self, message: &CallMessage) -> Result<B256, ApiError> {
        message.check_fee_fields()?;
        let from = message
            .from
            .ok_or_else(|| ApiError::InvalidParams("missing sender".to_string()))?;
        let wallet = self.accounts.find(from)?;

        let _guard = self.nonce_lock.lock_addr(from).await;
        let tx = self.fill_transaction(from, message).await?;
        let envelope = wallet.sign_transaction(tx, self.chain.chain_id())?;
        submit_transaction(self.pool.as_ref(), RecoveredTx::new(envelope, from), self.config.tx_fee_cap)
    }

    /// Receipt of a mined canonical transaction.
    pub fn get_transaction_receipt(&self, hash: B256) -> Option<RpcReceipt> {
        let location = self.chain.transaction_location(hash)?;
        let block = self.chain.block_by_hash(location.block_hash)?;
        let tx = block.transactions.get(location.index as usize)?;
        let receipts = self.chain.receipts(location.block_hash)?;
        let receipt = receipts.get(location.index as usize)?;
        Some(RpcReceipt::new(tx, receipt, location, block.header.base_fee()))
    }

    /// Looks the hash up among mined transactions first, then in the pool.
    pub fn get_transaction_by_hash(&self, hash: B256) -> Option<RpcTransaction> {
        if let Some(location) = self.chain.transaction_location(hash) {
            if let Some(found) = self.get_transaction_by_block_hash_and_index(location.block_hash, location.index) {
                return Some(found);
            }
        }
        let tx = self.pool.get_tx(hash)?;
        let base_fee = self.chain.current_header().base_fee();
        Some(RpcTransaction::new(&tx, None, base_fee))
    }

    pub fn get_block_transaction_count_by_hash(&self, block_hash: B256) -> Option<u64> {
        self.chain
            .block_by_hash(block_hash)
            .map(|block| block.transactions.len() as u64)
    }

    pub fn get_transaction_by_block_hash_and_index(&self, block_hash: B256, index: u64) -> Option<RpcTransaction> {
        let block = self.chain.block_by_hash(block_hash)?;
        let location = TxLocation {
            block_hash,
            block_number: block.header.number(),
            index,
        };
        let tx = block.transactions.get(index as usize)?;
        Some(RpcTransaction::new(tx, Some(location), block.header.base_fee()))
    }

    fn state_nonce(&self, address: Address, reference: &BlockReference) -> Result<u64, ApiError> {
        let (_, state) = resolver::resolve_state(self.chain.as_ref(), reference, self.config.canonical_policy)?;
        Ok(state.nonce(address))
    }

    /// Picks fees from the head base fee and the suggested tip unless the
    /// message names them.
    fn pricing(&self, message: &CallMessage) -> Result<Pricing, ApiError> {
        if let Some(gas_price) = message.gas_price {
            return Ok(Pricing::Legacy { gas_price });
        }
        let dynamic_requested = message.max_fee_per_gas.is_some() || message.max_priority_fee_per_gas.is_some();
        let base_fee = self.chain.current_header().base_fee();
        if base_fee.is_none() && !dynamic_requested {
            return Ok(Pricing::Legacy {
                gas_price: self.config.suggested_tip,
            });
        }

        let tip = message.max_priority_fee_per_gas.unwrap_or(self.config.suggested_tip);
        let max_fee = match message.max_fee_per_gas {
            Some(max_fee) => max_fee,
            None => u128::from(base_fee.unwrap_or_default())
                .saturating_mul(2)
                .saturating_add(tip),
        };
        if max_fee < tip {
            return Err(ApiError::InvalidParams(format!(
                "maxFeePerGas ({max_fee}) < maxPriorityFeePerGas ({tip})"
            )));
        }
        Ok(Pricing::Dynamic { max_fee, tip })
    }

    async fn fill_transaction(&self, from: Address, message: &CallMessage) -> Result<UnsignedTx, ApiError> {
        let input = message.input.clone().unwrap_or_default();
        if message.to.is_none() && input.is_empty() {
            return Err(ApiError::InvalidParams(
                "contract creation without any data provided".to_string(),
            ));
        }

        let pricing = self.pricing(message)?;
        let nonce = match message.nonce {
            Some(nonce) => nonce,
            None => self.pool.nonce(from),
        };

        let mut priced = CallMessage {
            nonce: Some(nonce),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            ..message.clone()
        };
        match pricing {
            Pricing::Legacy { gas_price } => priced.gas_price = Some(gas_price),
            Pricing::Dynamic { max_fee, tip } => {
                priced.max_fee_per_gas = Some(max_fee);
                priced.max_priority_fee_per_gas = Some(tip);
            }
        }

        let gas = match message.gas {
            Some(gas) => gas,
            None => {
                let cancel = self.request_token();
                self.simulator
                    .do_estimate_gas(&BlockReference::pending(), &priced, self.config.rpc_gas_cap, &cancel)
                    .await?
            }
        };
        debug!(%from, nonce, gas, ?pricing, "Filled local transaction");

        let to = message.to.map_or(TxKind::Create, TxKind::Call);
        let value = message.value.unwrap_or_default();
        let tx = match pricing {
            Pricing::Legacy { gas_price } => UnsignedTx::Legacy(TxLegacy {
                nonce,
                gas_price,
                gas_limit: gas,
                to,
                value,
                input,
                ..Default::default()
            }),
            Pricing::Dynamic { max_fee, tip } => UnsignedTx::Eip1559(TxEip1559 {
                nonce,
                gas_limit: gas,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: tip,
                to,
                value,
                input,
                ..Default::default()
            }),
        };
        Ok(tx)
    }
}
