//! Pool status and content.

use alloy_primitives::Address;

use super::EthApi;
use crate::rpc_types::{TxPoolContent, TxPoolContentFrom, TxPoolInspect, TxPoolStatus};

impl EthApi {
    pub fn txpool_status(&self) -> TxPoolStatus {
        let stats = self.pool.stats();
        TxPoolStatus {
            pending: stats.pending as u64,
            queued: stats.queued as u64,
        }
    }

    /// Every pool transaction, priced against the current head.
    pub fn txpool_content(&self) -> TxPoolContent {
        let base_fee = self.chain.current_header().base_fee();
        TxPoolContent::new(&self.pool.content(), base_fee)
    }

    pub fn txpool_content_from(&self, address: Address) -> TxPoolContentFrom {
        let base_fee = self.chain.current_header().base_fee();
        TxPoolContentFrom::new(&self.pool.content(), address, base_fee)
    }

    pub fn txpool_inspect(&self) -> TxPoolInspect {
        TxPoolInspect::new(&self.pool.content())
    }
}
