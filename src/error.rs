//! Request-level error type.
//!
//! Every failure path in the query pipeline surfaces as an [`ApiError`]. The
//! transport layer maps it onto a JSON-RPC error object through [`ApiError::code`]
//! and [`ApiError::data`].

use std::time::Duration;

use alloy_primitives::{Address, B256};
use thiserror::Error;

use crate::executor::{ExecutionError, VmError};
use crate::pool::PoolError;
use crate::revert::{RevertError, REVERT_ERROR_CODE};
use crate::signer::SignerError;
use crate::types::BlockReference;

/// JSON-RPC code for malformed or contradictory request parameters.
pub const INVALID_PARAMS_CODE: i64 = -32602;

/// JSON-RPC code used for every server-side failure without a dedicated code.
pub const SERVER_ERROR_CODE: i64 = -32000;

/// Errors returned by the query, simulation and submission APIs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    // ---- request shape ----
    /// A block reference named neither (or both) a number and a hash.
    #[error("invalid arguments; neither block nor hash specified")]
    AmbiguousReference,

    /// Legacy and fee-market pricing fields were mixed in one message.
    #[error("both gasPrice and (maxFeePerGas or maxPriorityFeePerGas) specified")]
    ConflictingFeeFields,

    /// An account override carried both `state` and `stateDiff`.
    #[error("account {0} has both 'state' and 'stateDiff'")]
    ConflictingOverride(Address),

    /// Any other malformed parameter.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Raw transaction bytes could not be decoded or their signer recovered.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    // ---- resolution ----
    /// No header matches the reference.
    #[error("header not found for block {0}")]
    NotFound(BlockReference),

    /// The hash resolves to a known block that is not on the canonical chain.
    #[error("hash {0} is not currently canonical")]
    NonCanonical(B256),

    /// The header is known but its post-state is not available.
    #[error("state not available for block {0}")]
    StateUnavailable(B256),

    // ---- simulation ----
    /// Deadline or cancellation fired while the message was executing.
    #[error("execution aborted (timeout = {timeout:?})")]
    ExecutionAborted {
        /// Timeout configured for the call, zero when none was set.
        timeout: Duration,
    },

    /// The message was rejected before any instruction ran.
    #[error("err: {source} (supplied gas {gas})")]
    Execution {
        /// Underlying rejection reported by the engine.
        source: ExecutionError,
        /// Gas limit the message was executed with.
        gas: u64,
    },

    /// Execution started but did not succeed.
    #[error(transparent)]
    Vm(VmError),

    /// Execution reverted with a payload.
    #[error(transparent)]
    Revert(#[from] RevertError),

    // ---- estimation ----
    /// Sender balance does not even cover the transferred value.
    #[error("insufficient funds for transfer")]
    InsufficientFunds,

    /// The message keeps failing at the highest gas limit the search may use.
    #[error("gas required exceeds allowance ({0})")]
    GasRequiredExceedsAllowance(u64),

    // ---- submission ----
    /// The transaction fee is above the configured cap.
    #[error("tx fee ({fee:.4} ether) exceeds the configured cap ({cap:.2} ether)")]
    FeeCapExceeded {
        /// Fee in ether.
        fee: f64,
        /// Configured cap in ether.
        cap: f64,
    },

    /// The pending pool refused the transaction.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Wallet lookup or signing failed.
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// A worker task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i64 {
        match self {
            ApiError::Revert(_) => REVERT_ERROR_CODE,
            ApiError::AmbiguousReference
            | ApiError::ConflictingFeeFields
            | ApiError::ConflictingOverride(_)
            | ApiError::InvalidParams(_)
            | ApiError::InvalidTransaction(_) => INVALID_PARAMS_CODE,
            _ => SERVER_ERROR_CODE,
        }
    }

    /// Structured error data, only present for reverts (the hex payload).
    pub fn data(&self) -> Option<&str> {
        match self {
            ApiError::Revert(revert) => Some(revert.data()),
            _ => None,
        }
    }

    /// Returns true when the engine rejected the message for supplying less
    /// than its intrinsic gas.
    pub fn is_intrinsic_gas(&self) -> bool {
        matches!(
            self,
            ApiError::Execution {
                source: ExecutionError::IntrinsicGasTooLow,
                ..
            }
        )
    }
}
