//! Bounded, FIFO-eviction in-memory ring, shared by the anomaly event
//! ring and the correlated-group ring (§3, §9 "open event ring vs.
//! persisted store"). Older entries stay in `Storage`; the ring only
//! serves the "recent" read path cheaply.

use tokio::sync::RwLock;
use std::collections::VecDeque;

/// A capacity-bounded, append-at-head/evict-at-tail buffer of cloneable
/// records. Generic over the item type so the engine and the
/// correlator can each own one without duplicating the eviction logic.
pub struct Ring<T: Clone + Send + Sync> {
    capacity: usize,
    items: RwLock<VecDeque<T>>,
}

impl<T: Clone + Send + Sync> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an item, evicting the oldest one first if already at
    /// capacity.
    pub async fn push(&self, item: T) {
        let mut items = self.items.write().await;
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.items.read().await.iter().cloned().collect()
    }

    pub async fn snapshot_matching<F: Fn(&T) -> bool>(&self, pred: F) -> Vec<T> {
        self.items.read().await.iter().filter(|i| pred(i)).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Mutate every item matching `pred` in place with `mutate`,
    /// returning how many were touched. Used by the correlator to stamp
    /// a fresh `correlationId` onto every member of a newly-closed
    /// group without a second pass through storage.
    pub async fn update_matching<P, M>(&self, pred: P, mutate: M) -> usize
    where
        P: Fn(&T) -> bool,
        M: Fn(&mut T),
    {
        let mut items = self.items.write().await;
        let mut touched = 0;
        for item in items.iter_mut() {
            if pred(item) {
                mutate(item);
                touched += 1;
            }
        }
        touched
    }
}
