//! Query, simulation and submission surface.
//!
//! [`EthApi`] wires the chain, pool, signer and execution engine together and
//! exposes the node's read and write operations. Methods are grouped the way
//! they are served:
//!
//! - [`blockchain`]: state reads, `call`, `estimate_gas`
//! - [`transaction`]: nonces, submissions, receipts and lookups
//! - [`txpool`]: pool status and content

pub mod blockchain;
pub mod transaction;
pub mod txpool;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::ChainReader;
use crate::config::ApiConfig;
use crate::executor::ExecutionEngine;
use crate::nonce::AddrLocker;
use crate::pool::TxPool;
use crate::signer::AccountManager;
use crate::simulate::Simulator;

/// The node API.
pub struct EthApi {
    chain: Arc<dyn ChainReader>,
    pool: Arc<dyn TxPool>,
    accounts: Arc<dyn AccountManager>,
    simulator: Simulator,
    nonce_lock: AddrLocker,
    config: ApiConfig,
    shutdown: CancellationToken,
}

impl EthApi {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        pool: Arc<dyn TxPool>,
        engine: Arc<dyn ExecutionEngine>,
        accounts: Arc<dyn AccountManager>,
        config: ApiConfig,
    ) -> Self {
        let simulator = Simulator::new(Arc::clone(&chain), engine, config.canonical_policy);
        Self {
            chain,
            pool,
            accounts,
            simulator,
            nonce_lock: AddrLocker::new(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<dyn TxPool> {
        &self.pool
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Aborts every in-flight simulation.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token for a single request, cancelled on shutdown.
    fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
