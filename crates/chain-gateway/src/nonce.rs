//! Per-address nonce discipline for transaction sending.
//!
//! Sending transactions from many sub-wallets in one cycle requires strict
//! per-address nonce ordering. This module provides a [`NonceManager`] whose
//! [`acquire`](NonceManager::acquire) hands out a [`NonceLease`]: the lease
//! holds the per-address lock for the duration of the send, so two tasks can
//! never interleave sends from the same address, while sends from different
//! addresses proceed in parallel.
//!
//! # Protocol
//!
//! 1. `acquire(addr)` awaits the per-address lock.
//! 2. If the slot is uninitialized, the chain's pending transaction count is
//!    read and cached.
//! 3. The lease hands out the current nonce and pre-increments the cache
//!    optimistically.
//! 4. Dropping the lease releases the lock. On ANY send failure the caller
//!    MUST call [`NonceLease::invalidate`] instead, which clears the cache so
//!    the next acquire re-reads from chain.
//!
//! A cycle-start [`reset_all`](NonceManager::reset_all) guarantees fresh
//! state every cycle.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::Result;
use crate::traits::ChainProvider;

// ═══════════════════════════════════════════════════════════════════════════════
// NONCE SLOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Cached nonce state for one address.
#[derive(Debug, Default)]
struct NonceSlot {
    /// Next nonce to hand out.
    current: u64,

    /// Whether `current` has been seeded from the chain.
    initialized: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// NONCE LEASE
// ═══════════════════════════════════════════════════════════════════════════════

/// Exclusive right to send one transaction from an address.
///
/// Holds the per-address lock until dropped. The nonce was already handed out
/// and the cache pre-incremented when the lease was created; a clean drop
/// keeps the cache, [`invalidate`](Self::invalidate) discards it.
#[derive(Debug)]
pub struct NonceLease {
    address: Address,
    nonce: u64,
    guard: OwnedMutexGuard<NonceSlot>,
}

impl NonceLease {
    /// The nonce to use for this transaction.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Discard the cached nonce after a failed send.
    ///
    /// The next [`NonceManager::acquire`] for this address re-reads the
    /// chain's pending transaction count. Consumes the lease (and releases
    /// the lock).
    pub fn invalidate(mut self) {
        self.guard.initialized = false;
        debug!(address = %self.address, nonce = self.nonce, "Nonce cache invalidated");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NONCE MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-address nonce cache with serialized access.
///
/// Single-threaded cooperative within one address, parallel across addresses.
///
/// # Example
///
/// ```ignore
/// let lease = manager.acquire(addr).await?;
/// let tx = build_tx(lease.nonce());
/// match provider.send_raw_transaction(tx).await {
///     Ok(_) => drop(lease),
///     Err(e) => {
///         lease.invalidate();
///         return Err(e.into());
///     }
/// }
/// ```
#[derive(Debug)]
pub struct NonceManager<P> {
    provider: Arc<P>,
    slots: Mutex<HashMap<Address, Arc<Mutex<NonceSlot>>>>,
}

impl<P: ChainProvider> NonceManager<P> {
    /// Create a new nonce manager backed by the given provider.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the per-address lock and hand out the next nonce.
    ///
    /// Seeds the cache from the chain's pending transaction count on first
    /// use (or after an invalidation).
    ///
    /// # Errors
    ///
    /// Returns an error if the pending-nonce read fails. The lock is
    /// released and the slot left uninitialized in that case.
    pub async fn acquire(&self, address: Address) -> Result<NonceLease> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(address).or_default())
        };

        let mut guard = slot.lock_owned().await;

        if !guard.initialized {
            let pending = self.provider.get_pending_nonce(address).await?;
            guard.current = pending;
            guard.initialized = true;
            debug!(%address, nonce = pending, "Seeded nonce from chain");
        }

        let nonce = guard.current;
        guard.current += 1;

        debug!(%address, nonce, "Leased nonce");

        Ok(NonceLease {
            address,
            nonce,
            guard,
        })
    }

    /// Drop every cached slot so the next acquire re-reads from chain.
    ///
    /// Called at cycle start. Leases still in flight keep their detached
    /// slot alive until dropped; subsequent acquires get a fresh one.
    pub async fn reset_all(&self) {
        let mut slots = self.slots.lock().await;
        let count = slots.len();
        slots.clear();
        if count > 0 {
            debug!(count, "Reset all nonce slots");
        }
    }

    /// Number of addresses currently tracked.
    pub async fn tracked_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[tokio::test]
    async fn first_acquire_seeds_from_chain() {
        let provider = Arc::new(MockProvider::new());
        let addr = Address::repeat_byte(0x01);
        provider.set_nonce(addr, 5);

        let manager = NonceManager::new(Arc::clone(&provider));

        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 5);
        drop(lease);

        // Second acquire uses cache, no chain read
        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 6);
    }

    #[tokio::test]
    async fn invalidate_rereads_from_chain() {
        let provider = Arc::new(MockProvider::new());
        let addr = Address::repeat_byte(0x02);
        provider.set_nonce(addr, 3);

        let manager = NonceManager::new(Arc::clone(&provider));

        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 3);
        lease.invalidate();

        // Simulate chain state change while we were failing
        provider.set_nonce(addr, 7);

        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 7);
    }

    #[tokio::test]
    async fn reset_all_clears_cache() {
        let provider = Arc::new(MockProvider::new());
        let addr = Address::repeat_byte(0x03);
        provider.set_nonce(addr, 1);

        let manager = NonceManager::new(Arc::clone(&provider));

        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 1);
        drop(lease);

        manager.reset_all().await;
        assert_eq!(manager.tracked_count().await, 0);

        provider.set_nonce(addr, 9);
        let lease = manager.acquire(addr).await.unwrap();
        assert_eq!(lease.nonce(), 9);
    }

    #[tokio::test]
    async fn acquires_are_serialized_per_address() {
        let provider = Arc::new(MockProvider::new());
        let addr = Address::repeat_byte(0x04);
        provider.set_nonce(addr, 0);

        let manager = Arc::new(NonceManager::new(Arc::clone(&provider)));

        // Ten concurrent tasks each lease one nonce; all must be unique and
        // strictly increasing because the lock serializes them.
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let lease = manager.acquire(addr).await.unwrap();
                    lease.nonce()
                })
            })
            .collect();

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }

        nonces.sort_unstable();
        let expected: Vec<u64> = (0..10).collect();
        assert_eq!(nonces, expected);
    }

    #[tokio::test]
    async fn parallel_across_addresses() {
        let provider = Arc::new(MockProvider::new());
        let addr_a = Address::repeat_byte(0x0a);
        let addr_b = Address::repeat_byte(0x0b);
        provider.set_nonce(addr_a, 100);
        provider.set_nonce(addr_b, 200);

        let manager = NonceManager::new(Arc::clone(&provider));

        // Holding a lease on A must not block an acquire on B.
        let lease_a = manager.acquire(addr_a).await.unwrap();
        let lease_b = manager.acquire(addr_b).await.unwrap();

        assert_eq!(lease_a.nonce(), 100);
        assert_eq!(lease_b.nonce(), 200);
    }
}
