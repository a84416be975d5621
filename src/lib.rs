//! Query and execution layer for an EVM node.
//!
//! This crate answers the questions a node's API is asked about its ledger:
//! what a message would do if it ran now, how much gas it needs, and whether
//! a signed transaction is accepted into the pending set. Every read works on
//! a point-in-time view of state named by block number, tag or hash.
//!
//! # Architecture
//!
//! - **Resolver**: turns a [`BlockReference`] into a header and a private
//!   [`StateSnapshot`]
//! - **Simulator**: applies [`StateOverride`]s to that snapshot and runs the
//!   message on an [`ExecutionEngine`] under a cancellable deadline
//! - **Estimator**: binary-searches the lowest gas limit that succeeds
//! - **Submission**: fee check, pool insertion and hash return for raw and
//!   locally signed transactions, with per-sender nonce locking
//!
//! [`EthApi`] ties these to a [`ChainReader`], a [`TxPool`] and an
//! [`AccountManager`]. [`Devnet`] provides in-memory versions of all three.
//!
//! # Quick Start
//!
//! ```
//! use evm_query::{ApiConfig, CallMessage, Devnet, DevnetConfig};
//!
//! // A chain whose genesis funds ten seeded wallets.
//! let devnet = Devnet::generate(DevnetConfig::default());
//! let api = devnet.api(ApiConfig::default());
//! let accounts = devnet.addresses();
//!
//! let transfer = CallMessage {
//!     from: Some(accounts[0]),
//!     to: Some(accounts[1]),
//!     ..Default::default()
//! };
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let gas = runtime.block_on(api.estimate_gas(&transfer, None)).unwrap();
//! assert_eq!(gas, 21_000);
//! ```

pub mod api;
pub mod chain;
pub mod config;
pub mod devnet;
pub mod error;
pub mod estimate;
pub mod executor;
pub mod logging;
pub mod nonce;
pub mod pool;
pub mod resolver;
pub mod revert;
pub mod rpc_types;
pub mod signer;
pub mod simulate;
pub mod state;
pub mod submit;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::EthApi;
pub use chain::{ChainReader, MemoryChain};
pub use config::{ApiConfig, CanonicalPolicy};
pub use devnet::{Devnet, DevnetConfig};
pub use error::ApiError;
pub use executor::{AbortSignal, ExecutionEngine, ExecutionOutcome, RevmEngine};
pub use nonce::AddrLocker;
pub use pool::{MemoryPool, TxPool};
pub use revert::RevertError;
pub use signer::{AccountManager, Keystore, LocalWallet, Wallet};
pub use simulate::Simulator;
pub use state::{AccountOverride, StateOverride, StateSnapshot};
pub use types::{BlockNumber, BlockReference, CallMessage};
