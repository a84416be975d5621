//! Revert payload decoding.

use alloy_primitives::hex;
use alloy_sol_types::{Revert, SolError};
use thiserror::Error;

use crate::executor::ExecutionOutcome;

/// JSON-RPC error code for reverted execution.
pub const REVERT_ERROR_CODE: i64 = 3;

/// A revert surfaced to the caller, with the raw payload kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RevertError {
    message: String,
    reason: Option<String>,
    data: String,
}

impl RevertError {
    /// Decodes `Error(string)` when possible. Other payloads still produce an
    /// error with the plain "execution reverted" message.
    pub fn new(revert_data: &[u8]) -> Self {
        let reason = Revert::abi_decode(revert_data)
            .ok()
            .map(|revert| revert.reason().to_string());
        let message = match &reason {
            Some(reason) => format!("execution reverted: {reason}"),
            None => "execution reverted".to_string(),
        };
        Self {
            message,
            reason,
            data: hex::encode_prefixed(revert_data),
        }
    }

    pub fn from_outcome(outcome: &ExecutionOutcome) -> Self {
        Self::new(&outcome.revert_data)
    }

    pub fn code(&self) -> i64 {
        REVERT_ERROR_CODE
    }

    /// Decoded `Error(string)` reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The raw payload as `0x`-prefixed hex.
    pub fn data(&self) -> &str {
        &self.data
    }
}
