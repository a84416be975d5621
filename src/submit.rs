//! Transaction submission: fee policy, pool insertion and hash return.

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::B256;
use tracing::info;

use crate::error::ApiError;
use crate::pool::TxPool;
use crate::types::RecoveredTx;

const WEI_PER_ETHER: f64 = 1e18;

/// Rejects transactions whose worst-case fee exceeds `cap` ether. A zero cap
/// disables the check.
pub fn check_tx_fee(gas_price: u128, gas: u64, cap: f64) -> Result<(), ApiError> {
    if cap == 0.0 {
        return Ok(());
    }
    let fee = gas_price as f64 * gas as f64 / WEI_PER_ETHER;
    if fee > cap {
        return Err(ApiError::FeeCapExceeded { fee, cap });
    }
    Ok(())
}

/// Decodes EIP-2718 bytes and recovers the sender.
pub fn decode_raw_transaction(raw: &[u8]) -> Result<RecoveredTx, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::InvalidTransaction("empty transaction bytes".to_string()));
    }
    let envelope =
        TxEnvelope::decode_2718_exact(raw).map_err(|err| ApiError::InvalidTransaction(err.to_string()))?;
    let sender = envelope
        .recover_signer()
        .map_err(|err| ApiError::InvalidTransaction(format!("invalid sender: {err}")))?;
    Ok(RecoveredTx::new(envelope, sender))
}

/// Hands a signed transaction to the pool and returns its hash.
pub fn submit_transaction(pool: &dyn TxPool, tx: RecoveredTx, fee_cap: f64) -> Result<B256, ApiError> {
    check_tx_fee(tx.max_fee_per_gas(), tx.gas_limit(), fee_cap)?;

    let hash = tx.hash();
    let from = tx.sender();
    let nonce = tx.nonce();
    let to = tx.to();
    pool.add_local(tx)?;

    match to {
        Some(to) => info!(%hash, %from, nonce, %to, "Submitted transaction"),
        None => info!(
            %hash,
            %from,
            nonce,
            contract = %from.create(nonce),
            "Submitted contract creation"
        ),
    }
    Ok(hash)
}
