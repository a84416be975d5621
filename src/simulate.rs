//! Cancellable call simulation.
//!
//! A simulation resolves its block reference to a private snapshot, applies
//! overrides to that copy and runs the message on a blocking worker. A watcher
//! task raises the engine's [`AbortSignal`] once the timeout elapses, the
//! caller's token is cancelled or the call future is dropped. An aborted run
//! always reports [`ApiError::ExecutionAborted`], whatever the engine returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chain::ChainReader;
use crate::config::CanonicalPolicy;
use crate::error::ApiError;
use crate::executor::{AbortSignal, BlockContext, ExecutionEngine, ExecutionOutcome};
use crate::resolver;
use crate::state::StateOverride;
use crate::types::{BlockReference, CallMessage, SealedHeader};

/// Number of ancestors served to `BLOCKHASH`.
const BLOCK_HASH_HISTORY: u64 = 256;

/// Runs messages against resolved chain state.
#[derive(Clone)]
pub struct Simulator {
    chain: Arc<dyn ChainReader>,
    engine: Arc<dyn ExecutionEngine>,
    policy: CanonicalPolicy,
}

impl Simulator {
    pub fn new(chain: Arc<dyn ChainReader>, engine: Arc<dyn ExecutionEngine>, policy: CanonicalPolicy) -> Self {
        Self { chain, engine, policy }
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    pub fn policy(&self) -> CanonicalPolicy {
        self.policy
    }

    /// Executes `message` at `reference` without touching stored state.
    ///
    /// A zero `timeout` leaves only `cancel` to stop the run. `gas_cap`
    /// defaults and bounds the message gas, zero meaning no cap.
    pub async fn do_call(
        &self,
        reference: &BlockReference,
        message: &CallMessage,
        overrides: Option<&StateOverride>,
        timeout: Duration,
        gas_cap: u64,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ApiError> {
        let start = Instant::now();

        let (header, mut state) = resolver::resolve_state(self.chain.as_ref(), reference, self.policy)?;
        if let Some(overrides) = overrides {
            state.apply_overrides(overrides)?;
        }
        let msg = message.to_message_context(gas_cap)?;
        let block = self.block_context(&header);
        let gas = msg.gas_limit;

        let abort = AbortSignal::new();
        if cancel.is_cancelled() {
            abort.raise();
        }
        // Cancelled if this future is dropped before the worker returns.
        let call_token = cancel.child_token();
        let guard = call_token.clone().drop_guard();
        let watcher = spawn_abort_watcher(call_token, timeout, abort.clone());

        let engine = Arc::clone(&self.engine);
        let worker_abort = abort.clone();
        let result =
            tokio::task::spawn_blocking(move || engine.execute(&block, &msg, state, &worker_abort)).await;
        guard.disarm();
        watcher.abort();

        debug!(
            number = header.number(),
            gas,
            runtime = ?start.elapsed(),
            "Executing EVM call finished"
        );

        if abort.is_raised() {
            return Err(ApiError::ExecutionAborted { timeout });
        }
        let result = result.map_err(|err| ApiError::Internal(format!("simulation worker failed: {err}")))?;
        result.map_err(|source| ApiError::Execution { source, gas })
    }

    /// Block environment for executing on top of `header`.
    pub fn block_context(&self, header: &SealedHeader) -> BlockContext {
        let inner = header.header();
        BlockContext {
            chain_id: self.chain.chain_id(),
            number: header.number(),
            timestamp: header.timestamp(),
            gas_limit: header.gas_limit(),
            base_fee: header.base_fee().unwrap_or_default(),
            beneficiary: inner.beneficiary,
            prevrandao: inner.mix_hash,
            block_hashes: self.ancestor_hashes(header),
        }
    }

    /// Hashes of up to [`BLOCK_HASH_HISTORY`] ancestors, walking parent links
    /// so side blocks see their own history.
    fn ancestor_hashes(&self, header: &SealedHeader) -> BTreeMap<u64, B256> {
        let mut hashes = BTreeMap::new();
        let mut parent = header.parent_hash();
        for _ in 0..BLOCK_HASH_HISTORY.min(header.number()) {
            let Some(ancestor) = self.chain.header_by_hash(parent) else {
                break;
            };
            hashes.insert(ancestor.number(), ancestor.hash());
            parent = ancestor.parent_hash();
        }
        hashes
    }
}

/// Raises `abort` when `token` is cancelled or, for a nonzero `timeout`,
/// when the timeout elapses.
fn spawn_abort_watcher(token: CancellationToken, timeout: Duration, abort: AbortSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        if timeout.is_zero() {
            token.cancelled().await;
        } else {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
        }
        abort.raise();
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::executor::{ExecutionError, MessageContext, VmError};
    use crate::state::{AccountOverride, StateSnapshot};
    use crate::types::Block;
    use alloy_consensus::Header;
    use alloy_primitives::{address, Address, Bytes, U256};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) const RICH: Address = address!("0x00000000000000000000000000000000000000f1");

    pub(crate) fn test_chain(balance: U256) -> Arc<MemoryChain> {
        let mut alloc = StateSnapshot::new();
        alloc.set_balance(RICH, balance);
        Arc::new(MemoryChain::new(
            1337,
            Header {
                gas_limit: 30_000_000,
                base_fee_per_gas: Some(1),
                ..Default::default()
            },
            alloc,
        ))
    }

    /// Spins until the abort signal is raised.
    pub(crate) struct BlockingEngine;

    impl ExecutionEngine for BlockingEngine {
        fn execute(
            &self,
            _block: &BlockContext,
            _message: &MessageContext,
            _state: StateSnapshot,
            abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            while !abort.is_raised() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(ExecutionOutcome::halted(VmError::OutOfGas, 0))
        }
    }

    /// Reports the balance and storage slot 0 of [`RICH`] as return data.
    struct EchoEngine;

    impl ExecutionEngine for EchoEngine {
        fn execute(
            &self,
            block: &BlockContext,
            message: &MessageContext,
            state: StateSnapshot,
            _abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            let mut out = state.balance(RICH).to_be_bytes_vec();
            out.extend_from_slice(&state.storage_at(RICH, U256::ZERO).to_be_bytes::<32>());
            out.extend_from_slice(&block.number.to_be_bytes());
            Ok(ExecutionOutcome::success(out.into(), message.gas_limit))
        }
    }

    /// Reverts after reading its state, like a contract that writes then fails.
    struct RevertEngine;

    impl ExecutionEngine for RevertEngine {
        fn execute(
            &self,
            _block: &BlockContext,
            message: &MessageContext,
            mut state: StateSnapshot,
            _abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            state.set_balance(RICH, U256::from(1));
            Ok(ExecutionOutcome::reverted(vec![0xab].into(), message.gas_limit))
        }
    }

    /// Like [`BlockingEngine`], but records when it has stopped.
    struct StopFlagEngine {
        stopped: Arc<AtomicBool>,
    }

    impl ExecutionEngine for StopFlagEngine {
        fn execute(
            &self,
            block: &BlockContext,
            message: &MessageContext,
            state: StateSnapshot,
            abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            let outcome = BlockingEngine.execute(block, message, state, abort);
            self.stopped.store(true, Ordering::SeqCst);
            outcome
        }
    }

    fn private_overrides() -> StateOverride {
        StateOverride::from([(
            RICH,
            AccountOverride {
                balance: Some(U256::from(7)),
                state_diff: Some(HashMap::from([(B256::ZERO, B256::with_last_byte(9))])),
                ..Default::default()
            },
        )])
    }

    fn assert_head_untouched(chain: &MemoryChain) {
        let head = chain.current_header().hash();
        let stored = chain.state_at(head).unwrap();
        assert_eq!(stored.balance(RICH), U256::from(100));
        assert_eq!(stored.storage_at(RICH, U256::ZERO), U256::ZERO);
    }

    fn simulator(chain: Arc<MemoryChain>, engine: impl ExecutionEngine + 'static) -> Simulator {
        Simulator::new(chain, Arc::new(engine), CanonicalPolicy::Enforce)
    }

    #[tokio::test]
    async fn test_overrides_are_private() {
        let chain = test_chain(U256::from(100));
        let sim = simulator(chain.clone(), EchoEngine);
        let overrides = private_overrides();

        let outcome = sim
            .do_call(
                &BlockReference::latest(),
                &CallMessage::default(),
                Some(&overrides),
                Duration::ZERO,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(U256::from_be_slice(&outcome.return_data[..32]), U256::from(7));
        assert_eq!(U256::from_be_slice(&outcome.return_data[32..64]), U256::from(9));
        assert_head_untouched(&chain);
    }

    #[tokio::test]
    async fn test_overrides_are_private_after_revert() {
        let chain = test_chain(U256::from(100));
        let sim = simulator(chain.clone(), RevertEngine);
        let outcome = sim
            .do_call(
                &BlockReference::latest(),
                &CallMessage::default(),
                Some(&private_overrides()),
                Duration::ZERO,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.revert_data, Bytes::from(vec![0xab]));
        assert_head_untouched(&chain);
    }

    #[tokio::test]
    async fn test_overrides_are_private_after_abort() {
        let chain = test_chain(U256::from(100));
        let sim = simulator(chain.clone(), BlockingEngine);
        let timeout = Duration::from_millis(10);
        let err = sim
            .do_call(
                &BlockReference::latest(),
                &CallMessage::default(),
                Some(&private_overrides()),
                timeout,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::ExecutionAborted { timeout });
        assert_head_untouched(&chain);
    }

    #[tokio::test]
    async fn test_dropped_call_stops_worker() {
        let stopped = Arc::new(AtomicBool::new(false));
        let engine = StopFlagEngine {
            stopped: stopped.clone(),
        };
        let sim = simulator(test_chain(U256::ZERO), engine);
        let cancel = CancellationToken::new();

        let message = CallMessage::default();
        let block = BlockReference::latest();
        let call = sim.do_call(&block, &message, None, Duration::ZERO, 0, &cancel);
        assert!(tokio::time::timeout(Duration::from_millis(5), call).await.is_err());

        // Nothing cancelled the parent token, so only the drop can stop it.
        for _ in 0..200 {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_gas_cap_bounds_message() {
        let sim = simulator(test_chain(U256::ZERO), EchoEngine);
        let message = CallMessage {
            gas: Some(80_000),
            ..Default::default()
        };
        let outcome = sim
            .do_call(
                &BlockReference::latest(),
                &message,
                None,
                Duration::ZERO,
                50_000,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.gas_used, 50_000);
    }

    #[tokio::test]
    async fn test_conflicting_override_fails_before_execution() {
        let sim = simulator(test_chain(U256::ZERO), BlockingEngine);
        let overrides = StateOverride::from([(
            RICH,
            AccountOverride {
                state: Some(HashMap::new()),
                state_diff: Some(HashMap::new()),
                ..Default::default()
            },
        )]);
        let err = sim
            .do_call(
                &BlockReference::latest(),
                &CallMessage::default(),
                Some(&overrides),
                Duration::ZERO,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::ConflictingOverride(RICH));
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let sim = simulator(test_chain(U256::ZERO), BlockingEngine);
        let timeout = Duration::from_millis(20);
        let err = sim
            .do_call(
                &BlockReference::latest(),
                &CallMessage::default(),
                None,
                timeout,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::ExecutionAborted { timeout });
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let sim = simulator(test_chain(U256::ZERO), BlockingEngine);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = sim
            .do_call(&BlockReference::latest(), &CallMessage::default(), None, Duration::ZERO, 0, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::ExecutionAborted { timeout: Duration::ZERO });
    }

    #[tokio::test]
    async fn test_cancelled_before_start_aborts() {
        let sim = simulator(test_chain(U256::ZERO), EchoEngine);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sim
            .do_call(&BlockReference::latest(), &CallMessage::default(), None, Duration::ZERO, 0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ExecutionAborted { .. }));
    }

    #[tokio::test]
    async fn test_unknown_block_fails_fast() {
        let sim = simulator(test_chain(U256::ZERO), BlockingEngine);
        let err = sim
            .do_call(
                &BlockReference::number(5),
                &CallMessage::default(),
                None,
                Duration::ZERO,
                0,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NotFound(BlockReference::number(5)));
    }

    #[test]
    fn test_block_context_collects_ancestors() {
        let chain = test_chain(U256::ZERO);
        let mut parent = chain.current_header();
        let mut hashes = vec![parent.hash()];
        for _ in 0..3 {
            let header = SealedHeader::seal(parent.child());
            let block = Block {
                header: header.clone(),
                transactions: Vec::new(),
            };
            chain.insert_block(block, Vec::new(), StateSnapshot::new(), true).unwrap();
            hashes.push(header.hash());
            parent = header;
        }

        let sim = simulator(chain.clone(), EchoEngine);
        let ctx = sim.block_context(&chain.current_header());
        assert_eq!(ctx.number, 3);
        assert_eq!(ctx.base_fee, 1);
        assert_eq!(ctx.chain_id, 1337);
        assert_eq!(ctx.block_hashes.len(), 3);
        for (number, hash) in hashes.iter().take(3).enumerate() {
            assert_eq!(ctx.block_hashes.get(&(number as u64)), Some(hash));
        }
    }
}
