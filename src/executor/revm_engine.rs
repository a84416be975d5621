//! revm-backed execution engine.
//!
//! Messages run through revm's mainnet handler on a [`CacheDB`] layered over
//! the request's snapshot. The transaction is inspected but never committed,
//! and the cache is dropped with the EVM.

use std::collections::BTreeMap;
use std::convert::Infallible;

use alloy_primitives::{Address, B256, U256};
use revm::{
    context::{
        result::{EVMError, ExecutionResult, HaltReason, InvalidTransaction},
        BlockEnv, CfgEnv, TxEnv,
    },
    database::CacheDB,
    database_interface::DatabaseRef,
    interpreter::Interpreter,
    primitives::{hardfork::SpecId, StorageKey, StorageValue, TxKind},
    state::{AccountInfo, Bytecode},
    Context, InspectEvm, Inspector, MainBuilder, MainContext,
};
use tracing::trace;

use super::{
    AbortSignal, BlockContext, ExecutionEngine, ExecutionError, ExecutionOutcome, FeeFields,
    MessageContext, VmError,
};
use crate::state::StateSnapshot;

const LEGACY_TX_TYPE: u8 = 0;
const DYNAMIC_FEE_TX_TYPE: u8 = 2;

/// Execution engine running messages through revm.
///
/// Base fee charging, block gas limit, nonce and EIP-3607 sender checks are
/// disabled: a simulated call only has to be executable, not includable.
#[derive(Debug, Clone, Copy)]
pub struct RevmEngine {
    spec: SpecId,
}

impl Default for RevmEngine {
    fn default() -> Self {
        Self::new(SpecId::PRAGUE)
    }
}

impl RevmEngine {
    /// Creates an engine for the given hardfork.
    pub fn new(spec: SpecId) -> Self {
        Self { spec }
    }

    fn cfg(&self, chain_id: u64) -> CfgEnv {
        let mut cfg = CfgEnv::new_with_spec(self.spec);
        cfg.chain_id = chain_id;
        cfg.disable_nonce_check = true;
        cfg.disable_base_fee = true;
        cfg.disable_block_gas_limit = true;
        cfg.disable_eip3607 = true;
        cfg
    }
}

impl ExecutionEngine for RevmEngine {
    fn execute(
        &self,
        block: &BlockContext,
        message: &MessageContext,
        state: StateSnapshot,
        abort: &AbortSignal,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if abort.is_raised() {
            return Ok(ExecutionOutcome::halted(VmError::Aborted, 0));
        }

        let nonce = message.nonce.unwrap_or_else(|| state.nonce(message.caller));
        let db = CacheDB::new(SnapshotDb {
            state,
            block_hashes: block.block_hashes.clone(),
        });

        let block_env = BlockEnv {
            number: U256::from(block.number),
            beneficiary: block.beneficiary,
            timestamp: U256::from(block.timestamp),
            gas_limit: block.gas_limit,
            basefee: block.base_fee,
            prevrandao: Some(block.prevrandao),
            ..Default::default()
        };

        let (tx_type, gas_price, gas_priority_fee) = match message.fees {
            FeeFields::Legacy { gas_price } => (LEGACY_TX_TYPE, gas_price, None),
            FeeFields::Dynamic {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (DYNAMIC_FEE_TX_TYPE, max_fee_per_gas, Some(max_priority_fee_per_gas)),
        };

        let tx_env = TxEnv {
            tx_type,
            caller: message.caller,
            kind: message.to.map_or(TxKind::Create, TxKind::Call),
            value: message.value,
            data: message.input.clone(),
            gas_limit: message.gas_limit,
            gas_price,
            gas_priority_fee,
            nonce,
            chain_id: Some(block.chain_id),
            ..Default::default()
        };

        let mut evm = Context::mainnet()
            .with_db(db)
            .with_block(block_env)
            .with_cfg(self.cfg(block.chain_id))
            .build_mainnet_with_inspector(AbortInspector::new(abort.clone()));

        let result = evm.inspect_one_tx(tx_env);
        trace!(gas_limit = message.gas_limit, ok = result.is_ok(), "revm execution finished");

        match result {
            Ok(ExecutionResult::Success {
                gas_used, output, ..
            }) => Ok(ExecutionOutcome::success(output.into_data(), gas_used)),
            Ok(ExecutionResult::Revert { gas_used, output }) => {
                Ok(ExecutionOutcome::reverted(output, gas_used))
            }
            Ok(ExecutionResult::Halt { reason, gas_used }) => {
                Ok(ExecutionOutcome::halted(halt_error(reason), gas_used))
            }
            Err(EVMError::Transaction(invalid)) => Err(invalid_transaction(invalid)),
            Err(err) => Err(ExecutionError::Invalid(err.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "revm"
    }
}

fn halt_error(reason: HaltReason) -> VmError {
    match reason {
        HaltReason::OutOfGas(_) => VmError::OutOfGas,
        other => VmError::Halted(format!("{other:?}")),
    }
}

fn invalid_transaction(err: InvalidTransaction) -> ExecutionError {
    match err {
        InvalidTransaction::CallGasCostMoreThanGasLimit { .. }
        | InvalidTransaction::GasFloorMoreThanGasLimit { .. } => ExecutionError::IntrinsicGasTooLow,
        InvalidTransaction::LackOfFundForMaxFee { .. } => ExecutionError::InsufficientFunds,
        other => ExecutionError::Invalid(other.to_string()),
    }
}

// ============================================================================
// Abort Inspector
// ============================================================================

/// Burns the remaining gas of the current frame once the abort signal is
/// raised, which unwinds every frame with out-of-gas.
#[derive(Debug, Clone)]
struct AbortInspector {
    signal: AbortSignal,
}

impl AbortInspector {
    fn new(signal: AbortSignal) -> Self {
        Self { signal }
    }
}

impl<CTX> Inspector<CTX> for AbortInspector {
    fn step(&mut self, interp: &mut Interpreter, _context: &mut CTX) {
        if self.signal.is_raised() {
            interp.gas.spend_all();
        }
    }
}

// ============================================================================
// Snapshot Database
// ============================================================================

/// Read-only revm database over a request-owned snapshot.
#[derive(Debug)]
struct SnapshotDb {
    state: StateSnapshot,
    block_hashes: BTreeMap<u64, B256>,
}

impl DatabaseRef for SnapshotDb {
    type Error = Infallible;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self.state.account(&address).map(|account| AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash(),
            code: (!account.code.is_empty()).then(|| Bytecode::new_legacy(account.code.clone())),
        }))
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(self
            .state
            .code_by_hash(code_hash)
            .filter(|code| !code.is_empty())
            .map(Bytecode::new_legacy)
            .unwrap_or_default())
    }

    fn storage_ref(&self, address: Address, index: StorageKey) -> Result<StorageValue, Self::Error> {
        Ok(self.state.storage_at(address, index))
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        Ok(self.block_hashes.get(&number).copied().unwrap_or_default())
    }
}
