//! Chain service contract and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy_consensus::Header;
use alloy_primitives::B256;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::state::StateSnapshot;
use crate::types::{Block, SealedHeader, StoredReceipt, TxLocation};

/// Read access to headers, blocks, receipts and post-block state.
///
/// Lookups by number only see the canonical chain; lookups by hash see every
/// known block.
pub trait ChainReader: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Head of the canonical chain.
    fn current_header(&self) -> SealedHeader;

    fn header_by_number(&self, number: u64) -> Option<SealedHeader>;

    fn header_by_hash(&self, hash: B256) -> Option<SealedHeader>;

    fn block_by_number(&self, number: u64) -> Option<Arc<Block>>;

    fn block_by_hash(&self, hash: B256) -> Option<Arc<Block>>;

    /// Canonical hash at `number`.
    fn canonical_hash(&self, number: u64) -> Option<B256>;

    /// Private copy of the state after the given block.
    fn state_at(&self, block_hash: B256) -> Option<StateSnapshot>;

    fn receipts(&self, block_hash: B256) -> Option<Vec<StoredReceipt>>;

    /// Location of a transaction mined on the canonical chain.
    fn transaction_location(&self, hash: B256) -> Option<TxLocation>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("unknown parent block {0}")]
    UnknownParent(B256),
    #[error("block {number} does not follow parent {parent_number}")]
    NonSequential { number: u64, parent_number: u64 },
    #[error("got {receipts} receipts for {transactions} transactions")]
    ReceiptCount { transactions: usize, receipts: usize },
}

#[derive(Debug, Default)]
struct ChainData {
    head: B256,
    canonical: BTreeMap<u64, B256>,
    blocks: HashMap<B256, Arc<Block>>,
    states: HashMap<B256, StateSnapshot>,
    receipts: HashMap<B256, Vec<StoredReceipt>>,
    tx_index: HashMap<B256, TxLocation>,
}

/// In-memory chain with canonical and side blocks.
#[derive(Debug)]
pub struct MemoryChain {
    chain_id: u64,
    inner: RwLock<ChainData>,
}

impl MemoryChain {
    /// Creates a chain holding only `genesis` and its allocation.
    pub fn new(chain_id: u64, genesis: Header, alloc: StateSnapshot) -> Self {
        let header = SealedHeader::seal(genesis);
        let hash = header.hash();
        let mut data = ChainData {
            head: hash,
            ..Default::default()
        };
        data.canonical.insert(header.number(), hash);
        data.states.insert(hash, alloc);
        data.receipts.insert(hash, Vec::new());
        data.blocks.insert(
            hash,
            Arc::new(Block {
                header,
                transactions: Vec::new(),
            }),
        );
        Self {
            chain_id,
            inner: RwLock::new(data),
        }
    }

    /// Stores a block with its receipts and post-state.
    ///
    /// Canonical blocks replace whatever was canonical at their height, index
    /// their transactions and become the head when they are at least as high
    /// as the current one. Side blocks are only reachable by hash.
    pub fn insert_block(
        &self,
        block: Block,
        receipts: Vec<StoredReceipt>,
        post_state: StateSnapshot,
        canonical: bool,
    ) -> Result<B256, ChainError> {
        if block.transactions.len() != receipts.len() {
            return Err(ChainError::ReceiptCount {
                transactions: block.transactions.len(),
                receipts: receipts.len(),
            });
        }

        let mut data = self.inner.write();
        let parent_hash = block.header.parent_hash();
        let parent_number = data
            .blocks
            .get(&parent_hash)
            .map(|parent| parent.header.number())
            .ok_or(ChainError::UnknownParent(parent_hash))?;
        let number = block.header.number();
        if number != parent_number + 1 {
            return Err(ChainError::NonSequential {
                number,
                parent_number,
            });
        }

        let hash = block.header.hash();
        if canonical {
            // Drop index entries of the block being replaced at this height.
            if let Some(replaced) = data.canonical.insert(number, hash) {
                if let Some(old) = data.blocks.get(&replaced).cloned() {
                    for tx in &old.transactions {
                        data.tx_index.remove(&tx.hash());
                    }
                }
            }
            for (index, tx) in block.transactions.iter().enumerate() {
                data.tx_index.insert(
                    tx.hash(),
                    TxLocation {
                        block_hash: hash,
                        block_number: number,
                        index: index as u64,
                    },
                );
            }
            let head_number = data
                .blocks
                .get(&data.head)
                .map(|head| head.header.number())
                .unwrap_or_default();
            if number >= head_number {
                data.head = hash;
            }
        }

        debug!(%hash, number, canonical, txs = block.transactions.len(), "Inserted block");
        data.states.insert(hash, post_state);
        data.receipts.insert(hash, receipts);
        data.blocks.insert(hash, Arc::new(block));
        Ok(hash)
    }
}

impl ChainReader for MemoryChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn current_header(&self) -> SealedHeader {
        let data = self.inner.read();
        // The head always points at a stored block.
        data.blocks
            .get(&data.head)
            .map(|block| block.header.clone())
            .unwrap_or_else(|| SealedHeader::seal(Header::default()))
    }

    fn header_by_number(&self, number: u64) -> Option<SealedHeader> {
        self.block_by_number(number).map(|block| block.header.clone())
    }

    fn header_by_hash(&self, hash: B256) -> Option<SealedHeader> {
        self.block_by_hash(hash).map(|block| block.header.clone())
    }

    fn block_by_number(&self, number: u64) -> Option<Arc<Block>> {
        let data = self.inner.read();
        let hash = data.canonical.get(&number)?;
        data.blocks.get(hash).cloned()
    }

    fn block_by_hash(&self, hash: B256) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(&hash).cloned()
    }

    fn canonical_hash(&self, number: u64) -> Option<B256> {
        self.inner.read().canonical.get(&number).copied()
    }

    fn state_at(&self, block_hash: B256) -> Option<StateSnapshot> {
        self.inner.read().states.get(&block_hash).cloned()
    }

    fn receipts(&self, block_hash: B256) -> Option<Vec<StoredReceipt>> {
        self.inner.read().receipts.get(&block_hash).cloned()
    }

    fn transaction_location(&self, hash: B256) -> Option<TxLocation> {
        self.inner.read().tx_index.get(&hash).copied()
    }
}
