use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::Deserialize;

use super::StateSnapshot;
use crate::error::ApiError;

/// Speculative replacement of one account's fields for a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverride {
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub code: Option<Bytes>,
    #[serde(default)]
    pub balance: Option<U256>,
    /// Full storage replacement.
    #[serde(default)]
    pub state: Option<HashMap<B256, B256>>,
    /// Slots written on top of existing storage.
    #[serde(default)]
    pub state_diff: Option<HashMap<B256, B256>>,
}

/// Overrides keyed by account.
pub type StateOverride = HashMap<Address, AccountOverride>;

impl StateSnapshot {
    /// Applies `overrides` to this snapshot.
    ///
    /// An account naming both `state` and `stateDiff` fails with
    /// [`ApiError::ConflictingOverride`] before its storage is touched.
    /// Accounts applied earlier stay applied, so a failed snapshot must be
    /// dropped.
    pub fn apply_overrides(&mut self, overrides: &StateOverride) -> Result<(), ApiError> {
        for (&address, account) in overrides {
            if let Some(nonce) = account.nonce {
                self.set_nonce(address, nonce);
            }
            if let Some(code) = &account.code {
                self.set_code(address, code.clone());
            }
            if let Some(balance) = account.balance {
                self.set_balance(address, balance);
            }
            match (&account.state, &account.state_diff) {
                (Some(_), Some(_)) => return Err(ApiError::ConflictingOverride(address)),
                (Some(state), None) => {
                    self.replace_storage(address, state.iter().map(|(slot, value)| slot_pair(slot, value)))
                }
                (None, Some(diff)) => {
                    for (slot, value) in diff {
                        let (slot, value) = slot_pair(slot, value);
                        self.set_storage(address, slot, value);
                    }
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}

fn slot_pair(slot: &B256, value: &B256) -> (U256, U256) {
    (U256::from_be_bytes(slot.0), U256::from_be_bytes(value.0))
}
