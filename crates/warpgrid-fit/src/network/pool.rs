//! Pool of reusable network indexes.
//!
//! Building a port bitmap costs 8 KiB per host network, and a scheduler
//! evaluates many nodes per placement. Indexes checked out of the pool are
//! returned on drop, fully reset, so no state leaks between fit calls.
//!
//! ```text
//! acquire()
//!   → idle index available → pop and hand out
//!   → none idle            → build a fresh one
//! drop(guard)
//!   → reset()
//!   → idle below max_idle  → push back
//!   → otherwise            → discard
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

use tracing::trace;

use crate::config::{DEFAULT_POOL_MAX_IDLE, PoolConfig, PortRange};

use super::NetworkIndex;

static GLOBAL: LazyLock<NetworkIndexPool> =
    LazyLock::new(|| NetworkIndexPool::new(DEFAULT_POOL_MAX_IDLE));

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Indexes sitting idle in the pool.
    pub idle: usize,
    /// Acquisitions served from an idle index.
    pub reused: u64,
    /// Acquisitions that had to build a new index.
    pub created: u64,
    /// Returned indexes dropped because the pool was full.
    pub discarded: u64,
}

/// Thread-safe pool of [`NetworkIndex`] values.
#[derive(Debug)]
pub struct NetworkIndexPool {
    idle: Mutex<Vec<NetworkIndex>>,
    max_idle: usize,
    reused: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl NetworkIndexPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            reused: AtomicU64::new(0),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_idle)
    }

    /// Process-wide pool used when a fit call is not handed an index.
    pub fn global() -> &'static NetworkIndexPool {
        &GLOBAL
    }

    /// Check out an index using the default dynamic port range.
    pub fn acquire(&self) -> PooledNetworkIndex<'_> {
        self.acquire_with(PortRange::default())
    }

    /// Check out an index that assigns dynamic ports from `range`.
    pub fn acquire_with(&self, range: PortRange) -> PooledNetworkIndex<'_> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut index = match reused {
            Some(index) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                index
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                NetworkIndex::new()
            }
        };
        index.set_dynamic_ports(range);

        PooledNetworkIndex { pool: self, index }
    }

    fn release(&self, mut index: NetworkIndex) {
        index.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(index);
            trace!(idle_count = idle.len(), "returned network index to pool");
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            reused: self.reused.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for NetworkIndexPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_MAX_IDLE)
    }
}

/// A checked-out index. Returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledNetworkIndex<'a> {
    pool: &'a NetworkIndexPool,
    index: NetworkIndex,
}

impl Deref for PooledNetworkIndex<'_> {
    type Target = NetworkIndex;

    fn deref(&self) -> &NetworkIndex {
        &self.index
    }
}

impl DerefMut for PooledNetworkIndex<'_> {
    fn deref_mut(&mut self) -> &mut NetworkIndex {
        &mut self.index
    }
}

impl Drop for PooledNetworkIndex<'_> {
    fn drop(&mut self) {
        // An empty index holds no bitmaps, so the placeholder is free.
        self.pool.release(std::mem::take(&mut self.index));
    }
}
