//! JSON response shapes for blocks, transactions, receipts and pool queries.

use std::collections::BTreeMap;

use alloy_consensus::Transaction;
use alloy_eips::eip2718::Typed2718;
use alloy_primitives::{Address, Bytes, Log, B256, B64, U256};
use serde::Serialize;

use crate::pool::PoolContent;
use crate::types::{Block, RecoveredTx, StoredReceipt, TxLocation};

/// A transaction as returned by `get_transaction_by_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    pub block_hash: Option<B256>,
    #[serde(with = "alloy_serde::quantity::opt")]
    pub block_number: Option<u64>,
    #[serde(with = "alloy_serde::quantity::opt")]
    pub transaction_index: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(with = "alloy_serde::quantity")]
    pub gas: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_price: u128,
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub max_priority_fee_per_gas: Option<u128>,
    pub value: U256,
    pub input: Bytes,
    #[serde(rename = "type", with = "alloy_serde::quantity")]
    pub tx_type: u8,
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub chain_id: Option<u64>,
}

impl RpcTransaction {
    /// Builds the response for `tx`.
    ///
    /// `base_fee` is the base fee of the including block, or of the current
    /// head for pool transactions.
    pub fn new(tx: &RecoveredTx, location: Option<TxLocation>, base_fee: Option<u64>) -> Self {
        let envelope = tx.envelope();
        let dynamic = envelope.is_dynamic_fee();
        Self {
            hash: tx.hash(),
            nonce: tx.nonce(),
            block_hash: location.map(|l| l.block_hash),
            block_number: location.map(|l| l.block_number),
            transaction_index: location.map(|l| l.index),
            from: tx.sender(),
            to: tx.to(),
            gas: tx.gas_limit(),
            gas_price: tx.effective_gas_price(base_fee),
            max_fee_per_gas: dynamic.then(|| envelope.max_fee_per_gas()),
            max_priority_fee_per_gas: envelope.max_priority_fee_per_gas(),
            value: tx.value(),
            input: envelope.input().clone(),
            tx_type: envelope.ty(),
            chain_id: envelope.chain_id(),
        }
    }
}

/// A receipt as returned by `get_transaction_receipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub block_hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    pub transaction_hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub cumulative_gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    #[serde(with = "alloy_serde::quantity")]
    pub status: u64,
    #[serde(rename = "type", with = "alloy_serde::quantity")]
    pub tx_type: u8,
    #[serde(with = "alloy_serde::quantity")]
    pub effective_gas_price: u128,
}

impl RpcReceipt {
    pub fn new(tx: &RecoveredTx, receipt: &StoredReceipt, location: TxLocation, base_fee: Option<u64>) -> Self {
        Self {
            block_hash: location.block_hash,
            block_number: location.block_number,
            transaction_hash: tx.hash(),
            transaction_index: location.index,
            from: tx.sender(),
            to: tx.to(),
            gas_used: receipt.gas_used,
            cumulative_gas_used: receipt.cumulative_gas_used,
            contract_address: receipt.contract_address,
            logs: receipt.logs.clone(),
            status: u64::from(receipt.success),
            tx_type: tx.envelope().ty(),
            effective_gas_price: tx.effective_gas_price(base_fee),
        }
    }
}

/// Transactions of an [`RpcBlock`]: hashes only, or full objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Hashes(Vec<B256>),
    Full(Vec<RpcTransaction>),
}

impl BlockTransactions {
    pub fn len(&self) -> usize {
        match self {
            Self::Hashes(hashes) => hashes.len(),
            Self::Full(txs) => txs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block as returned by `get_block_by_number` and `get_block_by_hash`.
///
/// The pending block has no hash, nonce or miner yet, so those are null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub hash: Option<B256>,
    pub parent_hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub base_fee_per_gas: Option<u64>,
    pub miner: Option<Address>,
    pub nonce: Option<B64>,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub mix_hash: B256,
    pub extra_data: Bytes,
    pub transactions: BlockTransactions,
}

impl RpcBlock {
    /// Builds the response for `block`, with full transaction objects when
    /// `full_tx` is set.
    pub fn new(block: &Block, full_tx: bool) -> Self {
        let header = block.header.header();
        let transactions = if full_tx {
            let base_fee = block.header.base_fee();
            let txs = block
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| {
                    let location = TxLocation {
                        block_hash: block.header.hash(),
                        block_number: block.header.number(),
                        index: index as u64,
                    };
                    RpcTransaction::new(tx, Some(location), base_fee)
                })
                .collect();
            BlockTransactions::Full(txs)
        } else {
            BlockTransactions::Hashes(block.transactions.iter().map(|tx| tx.hash()).collect())
        };

        Self {
            hash: Some(block.header.hash()),
            parent_hash: header.parent_hash,
            number: header.number,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            gas_used: header.gas_used,
            base_fee_per_gas: header.base_fee_per_gas,
            miner: Some(header.beneficiary),
            nonce: Some(header.nonce),
            state_root: header.state_root,
            transactions_root: header.transactions_root,
            receipts_root: header.receipts_root,
            mix_hash: header.mix_hash,
            extra_data: header.extra_data.clone(),
            transactions,
        }
    }

    /// Clears the fields a pending block does not have yet.
    pub fn into_pending(self) -> Self {
        Self {
            hash: None,
            miner: None,
            nonce: None,
            ..self
        }
    }
}

/// Counts returned by `txpool_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxPoolStatus {
    #[serde(with = "alloy_serde::quantity")]
    pub pending: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub queued: u64,
}

/// Transactions keyed by sender, then by decimal nonce.
pub type TxsByNonce<T> = BTreeMap<Address, BTreeMap<String, T>>;

/// Full pool listing returned by `txpool_content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxPoolContent {
    pub pending: TxsByNonce<RpcTransaction>,
    pub queued: TxsByNonce<RpcTransaction>,
}

impl TxPoolContent {
    pub fn new(content: &PoolContent, base_fee: Option<u64>) -> Self {
        let render = |tx: &RecoveredTx| RpcTransaction::new(tx, None, base_fee);
        Self {
            pending: group(&content.pending, render),
            queued: group(&content.queued, render),
        }
    }
}

/// Pool listing for a single sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxPoolContentFrom {
    pub pending: BTreeMap<String, RpcTransaction>,
    pub queued: BTreeMap<String, RpcTransaction>,
}

impl TxPoolContentFrom {
    pub fn new(content: &PoolContent, sender: Address, base_fee: Option<u64>) -> Self {
        let render = |txs: &BTreeMap<Address, BTreeMap<u64, RecoveredTx>>| -> BTreeMap<String, RpcTransaction> {
            txs.get(&sender)
                .map(|by_nonce| {
                    by_nonce
                        .iter()
                        .map(|(nonce, tx)| (nonce.to_string(), RpcTransaction::new(tx, None, base_fee)))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            pending: render(&content.pending),
            queued: render(&content.queued),
        }
    }
}

/// One-line summaries returned by `txpool_inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxPoolInspect {
    pub pending: TxsByNonce<String>,
    pub queued: TxsByNonce<String>,
}

impl TxPoolInspect {
    pub fn new(content: &PoolContent) -> Self {
        Self {
            pending: group(&content.pending, inspect_summary),
            queued: group(&content.queued, inspect_summary),
        }
    }
}

/// `"<to>: <value> wei + <gas> gas × <price> wei"`, with `contract creation`
/// in place of a missing recipient.
pub fn inspect_summary(tx: &RecoveredTx) -> String {
    let to = match tx.to() {
        Some(to) => to.to_string(),
        None => "contract creation".to_string(),
    };
    format!(
        "{to}: {} wei + {} gas × {} wei",
        tx.value(),
        tx.gas_limit(),
        tx.max_fee_per_gas()
    )
}

fn group<T>(
    txs: &BTreeMap<Address, BTreeMap<u64, RecoveredTx>>,
    render: impl Fn(&RecoveredTx) -> T,
) -> TxsByNonce<T> {
    txs.iter()
        .map(|(sender, by_nonce)| {
            let rendered = by_nonce
                .iter()
                .map(|(nonce, tx)| (nonce.to_string(), render(tx)))
                .collect();
            (*sender, rendered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{LocalWallet, UnsignedTx, Wallet};
    use alloy_consensus::{TxEip1559, TxLegacy};
    use alloy_primitives::{address, TxKind};

    const TO: Address = address!("0x00000000000000000000000000000000000000b0");

    fn sign(tx: UnsignedTx) -> RecoveredTx {
        let wallet = LocalWallet::from_seed(11);
        RecoveredTx::new(wallet.sign_transaction(tx, 1).unwrap(), wallet.address())
    }

    fn dynamic() -> RecoveredTx {
        sign(UnsignedTx::Eip1559(TxEip1559 {
            gas_limit: 21_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 5,
            to: TxKind::Call(TO),
            value: U256::from(3),
            ..Default::default()
        }))
    }

    fn legacy() -> RecoveredTx {
        sign(UnsignedTx::Legacy(TxLegacy {
            gas_price: 40,
            gas_limit: 21_000,
            to: TxKind::Call(TO),
            ..Default::default()
        }))
    }

    #[test]
    fn test_effective_gas_price() {
        // Base fee plus tip, bounded by the max fee.
        assert_eq!(dynamic().effective_gas_price(Some(10)), 15);
        assert_eq!(dynamic().effective_gas_price(Some(98)), 100);
        // Without a base fee the max fee stands in for the price.
        assert_eq!(dynamic().effective_gas_price(None), 100);

        assert_eq!(legacy().effective_gas_price(Some(10)), 40);
        assert_eq!(legacy().effective_gas_price(None), 40);
    }

    #[test]
    fn test_receipt_json() {
        let tx = dynamic();
        let location = TxLocation {
            block_hash: B256::repeat_byte(1),
            block_number: 2,
            index: 0,
        };
        let stored = StoredReceipt {
            success: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            contract_address: None,
            logs: Vec::new(),
        };
        let receipt = RpcReceipt::new(&tx, &stored, location, Some(10));
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"], "0x1");
        assert_eq!(json["type"], "0x2");
        assert_eq!(json["effectiveGasPrice"], "0xf");
        assert_eq!(json["blockNumber"], "0x2");
        assert!(json["contractAddress"].is_null());
    }

    #[test]
    fn test_pending_transaction_json() {
        let rpc = RpcTransaction::new(&legacy(), None, Some(1));
        let json = serde_json::to_value(&rpc).unwrap();
        assert!(json["blockHash"].is_null());
        assert!(json["blockNumber"].is_null());
        assert_eq!(json["gasPrice"], "0x28");
        assert!(json.get("maxFeePerGas").is_none());
        assert_eq!(json["chainId"], "0x1");
    }

    #[test]
    fn test_block_json() {
        let tx = dynamic();
        let block = Block {
            header: crate::types::SealedHeader::seal(alloy_consensus::Header {
                number: 3,
                gas_limit: 30_000_000,
                gas_used: 21_000,
                base_fee_per_gas: Some(10),
                ..Default::default()
            }),
            transactions: vec![tx.clone()],
        };

        let json = serde_json::to_value(RpcBlock::new(&block, false)).unwrap();
        assert_eq!(json["number"], "0x3");
        assert_eq!(json["gasUsed"], "0x5208");
        assert_eq!(json["baseFeePerGas"], "0xa");
        assert_eq!(json["transactions"][0], serde_json::to_value(tx.hash()).unwrap());

        let full = RpcBlock::new(&block, true);
        let BlockTransactions::Full(txs) = &full.transactions else {
            panic!("expected full transactions");
        };
        assert_eq!(txs[0].block_hash, Some(block.header.hash()));
        assert_eq!(txs[0].gas_price, 15);

        let pending = serde_json::to_value(full.into_pending()).unwrap();
        assert!(pending["hash"].is_null());
        assert!(pending["miner"].is_null());
        assert!(pending["nonce"].is_null());
        assert_eq!(pending["transactions"][0]["hash"], serde_json::to_value(tx.hash()).unwrap());
    }

    #[test]
    fn test_pool_views() {
        let tx = legacy();
        let mut content = PoolContent::default();
        content.queued.entry(tx.sender()).or_default().insert(4, tx.clone());

        let listing = TxPoolContent::new(&content, Some(1));
        assert!(listing.pending.is_empty());
        assert_eq!(listing.queued[&tx.sender()]["4"].hash, tx.hash());

        let inspect = TxPoolInspect::new(&content);
        assert_eq!(
            inspect.queued[&tx.sender()]["4"],
            format!("{TO}: 0 wei + 21000 gas × 40 wei")
        );
    }
}
