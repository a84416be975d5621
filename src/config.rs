//! Runtime configuration for the query API.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default gas cap applied to simulations and estimation.
pub const DEFAULT_RPC_GAS_CAP: u64 = 50_000_000;

/// Default wall-clock budget for a single `call`.
pub const DEFAULT_EVM_TIMEOUT_MS: u64 = 5_000;

/// One gwei, used as the default suggested tip.
pub const GWEI: u128 = 1_000_000_000;

/// Whether `requireCanonical` on hash references is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalPolicy {
    /// Accept any known block, canonical or not.
    Ignore,
    /// Reject non-canonical blocks when the reference asks for it.
    #[default]
    Enforce,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the query, simulation and submission API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Chain id of the served network.
    pub chain_id: u64,
    /// Upper bound on gas for `call` and `estimate_gas`; 0 disables it.
    pub rpc_gas_cap: u64,
    /// Timeout for `call` in milliseconds; 0 disables the deadline.
    pub evm_timeout_ms: u64,
    /// Maximum fee in ether for locally submitted transactions; 0 disables the check.
    pub tx_fee_cap: f64,
    /// Treatment of `requireCanonical` on hash references.
    pub canonical_policy: CanonicalPolicy,
    /// Priority fee used when a local send does not name one.
    pub suggested_tip: u128,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            rpc_gas_cap: DEFAULT_RPC_GAS_CAP,
            evm_timeout_ms: DEFAULT_EVM_TIMEOUT_MS,
            tx_fee_cap: 0.0,
            canonical_policy: CanonicalPolicy::Enforce,
            suggested_tip: GWEI,
        }
    }
}

impl ApiConfig {
    /// Loads a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Timeout for `call`.
    pub fn evm_timeout(&self) -> Duration {
        Duration::from_millis(self.evm_timeout_ms)
    }
}
