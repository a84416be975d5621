//! Per-address serialization of local nonce assignment.

use std::sync::Arc;

use alloy_primitives::Address;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while a local send reads its nonce, signs and submits. Dropping it
/// releases the address.
pub type AddrGuard = OwnedMutexGuard<()>;

/// Lazily created lock per sender address.
///
/// Locks are never evicted, so the table grows with the number of distinct
/// local senders.
#[derive(Debug, Default)]
pub struct AddrLocker {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl AddrLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `address`, then returns its guard.
    pub async fn lock_addr(&self, address: Address) -> AddrGuard {
        // Clone the lock out so the map shard is not held across the await.
        let lock = Arc::clone(self.locks.entry(address).or_default().value());
        lock.lock_owned().await
    }

    /// Number of addresses that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
