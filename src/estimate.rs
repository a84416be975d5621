//! Gas estimation by binary search over simulated calls.

use std::time::Duration;

use alloy_primitives::U256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ApiError;
use crate::executor::ExecutionOutcome;
use crate::resolver;
use crate::revert::RevertError;
use crate::simulate::Simulator;
use crate::types::{BlockReference, CallMessage};

/// Gas of a plain value transfer, the floor of every estimate.
pub const TX_GAS: u64 = 21_000;

impl Simulator {
    /// Finds the lowest gas limit at which `message` executes successfully.
    ///
    /// The search starts from the message gas (or the block gas limit),
    /// lowered to what the sender can pay for at its fee cap and to a nonzero
    /// `gas_cap`. Every probe runs against the block `reference` resolved to
    /// when the estimate started.
    pub async fn do_estimate_gas(
        &self,
        reference: &BlockReference,
        message: &CallMessage,
        gas_cap: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ApiError> {
        let fee_cap = message.fee_cap()?;
        let header = resolver::resolve_header(self.chain().as_ref(), reference, self.policy())?;
        let pinned = BlockReference::hash(header.hash());

        let mut lo = TX_GAS - 1;
        let mut hi = match message.gas {
            Some(gas) if gas >= TX_GAS => gas,
            _ => header.gas_limit(),
        };

        if fee_cap != 0 {
            let (_, state) = resolver::resolve_state(self.chain().as_ref(), &pinned, self.policy())?;
            let mut available = state.balance(message.sender());
            if let Some(value) = message.value {
                if value >= available {
                    return Err(ApiError::InsufficientFunds);
                }
                available -= value;
            }
            let allowance = available / U256::from(fee_cap);
            if let Ok(allowance) = u64::try_from(allowance) {
                if hi > allowance {
                    warn!(
                        original = hi,
                        balance = %available,
                        sent = %message.value.unwrap_or_default(),
                        fee_cap,
                        fundable = allowance,
                        "Gas estimation capped by limited funds"
                    );
                    hi = allowance;
                }
            }
        }

        if gas_cap != 0 && hi > gas_cap {
            warn!(requested = hi, cap = gas_cap, "Caller gas above allowance, capping");
            hi = gas_cap;
        }
        let cap = hi;

        let mut probes = 0u32;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            let (failed, _) = self.probe(&pinned, message, mid, gas_cap, cancel).await?;
            probes += 1;
            trace!(lo, hi, mid, failed, "Gas estimation probe");
            if failed {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        if hi == cap {
            let (failed, outcome) = self.probe(&pinned, message, hi, gas_cap, cancel).await?;
            if failed {
                if let Some(outcome) = outcome.filter(|outcome| !outcome.is_out_of_gas()) {
                    if !outcome.revert_data.is_empty() {
                        return Err(RevertError::from_outcome(&outcome).into());
                    }
                    if let Some(err) = outcome.error {
                        return Err(ApiError::Vm(err));
                    }
                }
                return Err(ApiError::GasRequiredExceedsAllowance(cap));
            }
        }

        debug!(estimate = hi, probes, "Gas estimation finished");
        Ok(hi)
    }

    /// Runs one probe. An intrinsic-gas rejection is a failed probe with no
    /// outcome; any other simulation error ends the search.
    async fn probe(
        &self,
        reference: &BlockReference,
        message: &CallMessage,
        gas: u64,
        gas_cap: u64,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<ExecutionOutcome>), ApiError> {
        let message = message.with_gas(gas);
        match self
            .do_call(reference, &message, None, Duration::ZERO, gas_cap, cancel)
            .await
        {
            Ok(outcome) => Ok((outcome.failed(), Some(outcome))),
            Err(err) if err.is_intrinsic_gas() => Ok((true, None)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanonicalPolicy;
    use crate::executor::{
        AbortSignal, BlockContext, ExecutionEngine, ExecutionError, MessageContext, RevmEngine, VmError,
    };
    use crate::simulate::tests::{test_chain, BlockingEngine, RICH};
    use crate::state::StateSnapshot;
    use alloy_primitives::{address, Bytes};
    use alloy_sol_types::{Revert, SolError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Succeeds at or above `threshold`, runs out of gas below it and rejects
    /// anything under `floor` as intrinsic.
    struct ThresholdEngine {
        floor: u64,
        threshold: u64,
        probes: Arc<AtomicUsize>,
        rejected: Arc<AtomicUsize>,
    }

    impl ExecutionEngine for ThresholdEngine {
        fn execute(
            &self,
            _block: &BlockContext,
            message: &MessageContext,
            _state: StateSnapshot,
            _abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if message.gas_limit < self.floor {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return Err(ExecutionError::IntrinsicGasTooLow);
            }
            if message.gas_limit < self.threshold {
                return Ok(ExecutionOutcome::halted(VmError::OutOfGas, message.gas_limit));
            }
            Ok(ExecutionOutcome::success(Bytes::new(), self.threshold))
        }
    }

    /// Always reverts with `Error("insufficient balance")`.
    struct RevertingEngine;

    impl ExecutionEngine for RevertingEngine {
        fn execute(
            &self,
            _block: &BlockContext,
            _message: &MessageContext,
            _state: StateSnapshot,
            _abort: &AbortSignal,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            let payload = Revert {
                reason: "insufficient balance".into(),
            }
            .abi_encode();
            Ok(ExecutionOutcome::reverted(payload.into(), 25_000))
        }
    }

    fn threshold_simulator(threshold: u64, balance: U256) -> (Simulator, Arc<AtomicUsize>) {
        let probes = Arc::new(AtomicUsize::new(0));
        let engine = ThresholdEngine {
            floor: TX_GAS,
            threshold,
            probes: probes.clone(),
            rejected: Arc::default(),
        };
        let sim = Simulator::new(test_chain(balance), Arc::new(engine), CanonicalPolicy::Enforce);
        (sim, probes)
    }

    async fn estimate(sim: &Simulator, message: &CallMessage, gas_cap: u64) -> Result<u64, ApiError> {
        sim.do_estimate_gas(&BlockReference::pending(), message, gas_cap, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_finds_exact_threshold_within_probe_bound() {
        for threshold in [21_000u64, 21_001, 53_123, 1_000_000, 29_999_999] {
            let (sim, probes) = threshold_simulator(threshold, U256::ZERO);
            let gas = estimate(&sim, &CallMessage::default(), 0).await.unwrap();
            assert_eq!(gas, threshold);

            // hi0 is the block gas limit, lo0 is TX_GAS - 1.
            let range = 30_000_000 - (TX_GAS - 1);
            let bound = (u64::BITS - (range - 1).leading_zeros()) as usize + 1;
            assert!(probes.load(Ordering::SeqCst) <= bound, "threshold {threshold}");
        }
    }

    #[tokio::test]
    async fn test_intrinsic_rejections_raise_lower_bound() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let engine = ThresholdEngine {
            floor: 30_000,
            threshold: 30_500,
            probes: Arc::default(),
            rejected: rejected.clone(),
        };
        let sim = Simulator::new(test_chain(U256::ZERO), Arc::new(engine), CanonicalPolicy::Enforce);
        let message = CallMessage {
            gas: Some(100_000),
            ..Default::default()
        };
        // Probes at 25_936, 28_405 and 29_639 fall under the floor.
        assert_eq!(estimate(&sim, &message, 0).await.unwrap(), 30_500);
        assert_eq!(rejected.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_threshold_at_cap_is_verified() {
        let (sim, _) = threshold_simulator(100_000, U256::ZERO);
        let message = CallMessage {
            gas: Some(100_000),
            ..Default::default()
        };
        assert_eq!(estimate(&sim, &message, 0).await.unwrap(), 100_000);
    }

    #[tokio::test]
    async fn test_exceeds_allowance() {
        let (sim, _) = threshold_simulator(60_000, U256::ZERO);
        let err = estimate(&sim, &CallMessage::default(), 50_000).await.unwrap_err();
        assert_eq!(err, ApiError::GasRequiredExceedsAllowance(50_000));
    }

    #[tokio::test]
    async fn test_funding_caps_upper_bound() {
        let (sim, probes) = threshold_simulator(21_000, U256::from(1_000));
        let message = CallMessage {
            from: Some(RICH),
            value: Some(U256::from(100)),
            gas_price: Some(10),
            ..Default::default()
        };
        // (1000 - 100) / 10 = 90 is below the intrinsic floor, so the single
        // verification probe is rejected and the cap is reported.
        let err = estimate(&sim, &message, 0).await.unwrap_err();
        assert_eq!(err, ApiError::GasRequiredExceedsAllowance(90));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_value_above_balance() {
        let (sim, probes) = threshold_simulator(21_000, U256::from(1_000));
        let message = CallMessage {
            from: Some(RICH),
            value: Some(U256::from(1_000)),
            max_fee_per_gas: Some(1),
            ..Default::default()
        };
        assert_eq!(estimate(&sim, &message, 0).await, Err(ApiError::InsufficientFunds));
        assert_eq!(probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflicting_fee_fields() {
        let (sim, probes) = threshold_simulator(21_000, U256::ZERO);
        let message = CallMessage {
            gas_price: Some(1),
            max_fee_per_gas: Some(1),
            ..Default::default()
        };
        assert_eq!(estimate(&sim, &message, 0).await, Err(ApiError::ConflictingFeeFields));
        assert_eq!(probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revert_surfaces_decoded_reason() {
        let sim = Simulator::new(test_chain(U256::ZERO), Arc::new(RevertingEngine), CanonicalPolicy::Enforce);
        let err = estimate(&sim, &CallMessage::default(), 0).await.unwrap_err();
        let ApiError::Revert(revert) = &err else {
            panic!("expected revert, got {err:?}");
        };
        assert_eq!(revert.reason(), Some("insufficient balance"));
        assert!(revert.data().starts_with("0x08c379a0"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_search() {
        let sim = Simulator::new(test_chain(U256::ZERO), Arc::new(BlockingEngine), CanonicalPolicy::Enforce);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sim
            .do_estimate_gas(&BlockReference::latest(), &CallMessage::default(), 0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ExecutionAborted { .. }));
    }

    #[tokio::test]
    async fn test_revm_transfer_estimates_21000() {
        let sim = Simulator::new(
            test_chain(U256::from(10u64).pow(U256::from(18))),
            Arc::new(RevmEngine::default()),
            CanonicalPolicy::Enforce,
        );
        let message = CallMessage {
            from: Some(RICH),
            to: Some(address!("0x00000000000000000000000000000000000000b0")),
            value: Some(U256::from(1)),
            ..Default::default()
        };
        assert_eq!(estimate(&sim, &message, 0).await.unwrap(), 21_000);
    }
}
