//! Message execution against a state snapshot.
//!
//! This module provides the [`ExecutionEngine`] trait used by the simulation
//! pipeline and [`RevmEngine`], its revm-backed implementation.
//!
//! An engine receives an owned [`StateSnapshot`] and drops it when done, so
//! whatever the message writes is never visible outside the call.

mod revm_engine;

pub use revm_engine::RevmEngine;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

use crate::state::StateSnapshot;

/// Cooperative abort flag shared between a watcher and a running engine.
///
/// Engines poll it between instructions; once raised, the running message
/// winds down and its result must be discarded.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Block-level environment a message executes in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockContext {
    pub chain_id: u64,
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    /// Zero for blocks without a base fee.
    pub base_fee: u64,
    pub beneficiary: Address,
    pub prevrandao: B256,
    /// Hashes served to `BLOCKHASH`, keyed by height.
    pub block_hashes: BTreeMap<u64, B256>,
}

/// Pricing of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeFields {
    Legacy {
        gas_price: u128,
    },
    Dynamic {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// A fully defaulted message ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub caller: Address,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub fees: FeeFields,
    /// Uses the caller's state nonce when absent.
    pub nonce: Option<u64>,
}

/// Failure raised after execution started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,
    #[error("execution reverted")]
    Reverted,
    #[error("execution aborted")]
    Aborted,
    #[error("execution halted: {0}")]
    Halted(String),
}

/// Rejection before any instruction ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("intrinsic gas too low")]
    IntrinsicGasTooLow,
    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,
    #[error("{0}")]
    Invalid(String),
}

/// What a message did.
///
/// On revert, `revert_data` holds the payload and `return_data` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub return_data: Bytes,
    pub revert_data: Bytes,
    pub error: Option<VmError>,
    pub gas_used: u64,
}

impl ExecutionOutcome {
    pub fn success(return_data: Bytes, gas_used: u64) -> Self {
        Self {
            return_data,
            gas_used,
            ..Default::default()
        }
    }

    pub fn reverted(revert_data: Bytes, gas_used: u64) -> Self {
        Self {
            revert_data,
            error: Some(VmError::Reverted),
            gas_used,
            ..Default::default()
        }
    }

    pub fn halted(error: VmError, gas_used: u64) -> Self {
        Self {
            error: Some(error),
            gas_used,
            ..Default::default()
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_out_of_gas(&self) -> bool {
        matches!(self.error, Some(VmError::OutOfGas))
    }
}

/// Something that can run a single message against a snapshot.
///
/// Implementations must poll `abort` often enough that a raised signal stops
/// execution promptly, and must never leak writes out of `state`.
pub trait ExecutionEngine: Send + Sync {
    /// Executes `message` on top of `state`.
    ///
    /// `Err` means the message was rejected before execution (intrinsic gas,
    /// funding, malformed fields). Everything that happens once execution
    /// starts is reported through [`ExecutionOutcome`].
    fn execute(
        &self,
        block: &BlockContext,
        message: &MessageContext,
        state: StateSnapshot,
        abort: &AbortSignal,
    ) -> Result<ExecutionOutcome, ExecutionError>;

    /// Returns a human-readable name for this engine.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
