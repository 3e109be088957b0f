//! Transaction pool.
//!
//! Holds transactions that have been submitted or gossiped but not yet
//! committed. The primary takes from the front in arrival order; committed
//! and rejected transactions are removed explicitly.
//!
//! Removal is lazy: ids stay in the arrival queue until they reach the front
//! or the queue is compacted, and are skipped when their entry is gone.

use crate::error::{ConsensusError, Result};
use crate::transaction::{Transaction, TransactionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Pool limits.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Pending transactions kept before the oldest is evicted.
    pub max_transactions: usize,

    /// Age after which a pending transaction is no longer proposed.
    pub max_transaction_age: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_transaction_age: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Entry {
    tx: Transaction,
    received: Instant,
    proposed: u32,
}

#[derive(Debug, Default)]
struct Pool {
    entries: HashMap<TransactionId, Entry>,
    arrivals: VecDeque<TransactionId>,
}

impl Pool {
    /// Drops queue slots whose entry was removed once they outnumber live ones.
    fn compact(&mut self) {
        if self.arrivals.len() > 2 * self.entries.len() + 64 {
            let entries = &self.entries;
            self.arrivals.retain(|id| entries.contains_key(id));
        }
    }

    fn evict_oldest(&mut self) -> Option<TransactionId> {
        while let Some(id) = self.arrivals.pop_front() {
            if self.entries.remove(&id).is_some() {
                return Some(id);
            }
        }
        None
    }
}

/// FIFO pool of pending transactions.
pub struct Mempool {
    config: MempoolConfig,
    pool: RwLock<Pool>,
}

impl Mempool {
    /// Creates an empty pool.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(Pool::default()),
        }
    }

    /// Creates an empty pool with default limits.
    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// Queues a transaction. At capacity the oldest pending one is evicted.
    pub fn add(&self, tx: Transaction) -> Result<TransactionId> {
        let id = tx.id();
        let mut pool = self.pool.write();

        if pool.entries.contains_key(&id) {
            return Err(ConsensusError::DuplicateTransaction(id.to_hex()));
        }
        while pool.entries.len() >= self.config.max_transactions.max(1) {
            match pool.evict_oldest() {
                Some(evicted) => tracing::debug!(tx = %evicted, "mempool full, evicted oldest"),
                None => break,
            }
        }

        pool.entries.insert(
            id,
            Entry {
                tx,
                received: Instant::now(),
                proposed: 0,
            },
        );
        pool.arrivals.push_back(id);
        tracing::trace!(tx = %id, "queued transaction");
        Ok(id)
    }

    /// Returns a pending transaction.
    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.pool.read().entries.get(id).map(|entry| entry.tx.clone())
    }

    /// Returns true if the transaction is pending.
    pub fn contains(&self, id: &TransactionId) -> bool {
        self.pool.read().entries.contains_key(id)
    }

    /// Returns the number of pending transactions.
    pub fn len(&self) -> usize {
        self.pool.read().entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pool.read().entries.is_empty()
    }

    /// Removes one transaction.
    pub fn remove(&self, id: &TransactionId) -> Option<Transaction> {
        let mut pool = self.pool.write();
        let removed = pool.entries.remove(id).map(|entry| entry.tx);
        pool.compact();
        removed
    }

    /// Removes committed or rejected transactions.
    pub fn remove_batch(&self, ids: &[TransactionId]) {
        if ids.is_empty() {
            return;
        }
        let mut pool = self.pool.write();
        let removed = ids
            .iter()
            .filter(|id| pool.entries.remove(id).is_some())
            .count();
        pool.compact();
        tracing::debug!(removed, "removed transactions from mempool");
    }

    /// Returns up to `max` unexpired transactions in arrival order.
    ///
    /// Returned transactions stay pending until removed.
    pub fn take(&self, max: usize) -> Vec<Transaction> {
        let now = Instant::now();
        let mut guard = self.pool.write();
        let pool = &mut *guard;

        let mut taken = Vec::with_capacity(max.min(pool.entries.len()));
        for id in &pool.arrivals {
            if taken.len() >= max {
                break;
            }
            let Some(entry) = pool.entries.get_mut(id) else {
                continue;
            };
            if now.duration_since(entry.received) > self.config.max_transaction_age {
                continue;
            }
            entry.proposed += 1;
            taken.push(entry.tx.clone());
        }
        taken
    }

    /// Drops transactions older than the configured age. Returns how many.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_transaction_age;
        let mut pool = self.pool.write();

        let expired: HashSet<TransactionId> = pool
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.received) > max_age)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return 0;
        }
        pool.entries.retain(|id, _| !expired.contains(id));
        pool.arrivals.retain(|id| !expired.contains(id));

        tracing::debug!(reaped = expired.len(), "reaped expired transactions");
        expired.len()
    }

    /// Returns a snapshot of the pool.
    pub fn stats(&self) -> MempoolStats {
        let now = Instant::now();
        let pool = self.pool.read();
        MempoolStats {
            pending: pool.entries.len(),
            oldest_age: pool
                .entries
                .values()
                .map(|entry| now.duration_since(entry.received))
                .max()
                .unwrap_or_default(),
            proposals: pool
                .entries
                .values()
                .map(|entry| u64::from(entry.proposed))
                .sum(),
        }
    }
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("pending", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolStats {
    /// Pending transactions.
    pub pending: usize,
    /// Age of the oldest pending transaction.
    pub oldest_age: Duration,
    /// Times pending transactions were handed to a proposal, summed.
    pub proposals: u64,
}
