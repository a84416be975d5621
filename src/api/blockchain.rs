//! Block and state reads, `call` and `estimate_gas`.

use alloy_primitives::{Address, Bytes, B256, U256};
use tracing::debug;

use super::EthApi;
use crate::error::ApiError;
use crate::resolver;
use crate::revert::RevertError;
use crate::rpc_types::RpcBlock;
use crate::state::{StateOverride, StateSnapshot};
use crate::types::{BlockNumber, BlockReference, CallMessage};

impl EthApi {
    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id()
    }

    /// Number of the canonical head.
    pub fn block_number(&self) -> u64 {
        self.chain.current_header().number()
    }

    /// Canonical block at `number`. `pending` serves the head with its hash,
    /// nonce and miner cleared.
    pub fn get_block_by_number(&self, number: BlockNumber, full_tx: bool) -> Option<RpcBlock> {
        let block = match number {
            BlockNumber::Latest | BlockNumber::Pending => self.chain.block_by_hash(self.chain.current_header().hash()),
            BlockNumber::Earliest => self.chain.block_by_number(0),
            BlockNumber::Number(number) => self.chain.block_by_number(number),
        }?;
        let response = RpcBlock::new(&block, full_tx);
        if number == BlockNumber::Pending {
            return Some(response.into_pending());
        }
        Some(response)
    }

    /// Any known block with this hash, canonical or not.
    pub fn get_block_by_hash(&self, hash: B256, full_tx: bool) -> Option<RpcBlock> {
        let block = self.chain.block_by_hash(hash)?;
        Some(RpcBlock::new(&block, full_tx))
    }

    pub fn get_balance(&self, address: Address, reference: &BlockReference) -> Result<U256, ApiError> {
        Ok(self.state_at(reference)?.balance(address))
    }

    pub fn get_code(&self, address: Address, reference: &BlockReference) -> Result<Bytes, ApiError> {
        Ok(self.state_at(reference)?.code(address))
    }

    /// Storage slot `slot` of `address`, as a 32-byte word.
    pub fn get_storage_at(&self, address: Address, slot: U256, reference: &BlockReference) -> Result<B256, ApiError> {
        let value = self.state_at(reference)?.storage_at(address, slot);
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    /// Executes `message` and returns its output.
    ///
    /// Reverts come back as [`ApiError::Revert`] with the decoded reason and
    /// raw payload; other in-execution failures as [`ApiError::Vm`].
    pub async fn call(
        &self,
        message: &CallMessage,
        reference: Option<BlockReference>,
        overrides: Option<&StateOverride>,
    ) -> Result<Bytes, ApiError> {
        let reference = reference.unwrap_or_default();
        let cancel = self.request_token();
        let outcome = self
            .simulator
            .do_call(
                &reference,
                message,
                overrides,
                self.config.evm_timeout(),
                self.config.rpc_gas_cap,
                &cancel,
            )
            .await?;

        if !outcome.revert_data.is_empty() {
            return Err(RevertError::from_outcome(&outcome).into());
        }
        if let Some(err) = outcome.error {
            return Err(ApiError::Vm(err));
        }
        Ok(outcome.return_data)
    }

    /// Estimates the gas `message` needs, against the pending block unless
    /// told otherwise.
    pub async fn estimate_gas(
        &self,
        message: &CallMessage,
        reference: Option<BlockReference>,
    ) -> Result<u64, ApiError> {
        let reference = reference.unwrap_or_else(BlockReference::pending);
        let cancel = self.request_token();
        let gas = self
            .simulator
            .do_estimate_gas(&reference, message, self.config.rpc_gas_cap, &cancel)
            .await?;
        debug!(%reference, gas, "Estimated gas");
        Ok(gas)
    }

    /// Suggested legacy gas price: the configured tip over the head base fee.
    pub fn gas_price(&self) -> u128 {
        let base_fee = self.chain.current_header().base_fee().unwrap_or_default();
        self.config.suggested_tip.saturating_add(u128::from(base_fee))
    }

    fn state_at(&self, reference: &BlockReference) -> Result<StateSnapshot, ApiError> {
        let (_, state) = resolver::resolve_state(self.chain.as_ref(), reference, self.config.canonical_policy)?;
        Ok(state)
    }
}
