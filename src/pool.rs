//! Least-loaded hub selection
//!
//! Live hubs sit in a mutex-protected min-heap keyed by how many links
//! are currently admitted through them. Admission pre-increments the
//! load under the same lock that picks the hub, so selection and
//! accounting are atomic; link teardown decrements it. A hub removed
//! from the pool carries a sentinel index, making a late decrement a
//! no-op instead of an out-of-bounds heap fixup.

use crate::mux::Hub;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Index value of an item that is not in any pool
const DETACHED: usize = usize::MAX;

/// A hub plus the bookkeeping the pool needs to order it
pub struct HubItem {
    hub: Hub,
    /// Links currently admitted through this hub. Only mutated under
    /// the pool lock.
    priority: AtomicI64,
    /// Position in the heap's backing array, or `DETACHED`. Only
    /// mutated under the pool lock.
    index: AtomicUsize,
}

impl HubItem {
    pub fn new(hub: Hub) -> Arc<Self> {
        Arc::new(Self {
            hub,
            priority: AtomicI64::new(0),
            index: AtomicUsize::new(DETACHED),
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Current admitted-link count
    pub fn load(&self) -> i64 {
        self.priority.load(Ordering::Relaxed)
    }
}

/// Min-heap of live hubs ordered by load
pub struct HubPool {
    heap: Mutex<Vec<Arc<HubItem>>>,
}

impl HubPool {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(Vec::new()),
        }
    }

    /// Insert a hub into the pool
    pub fn push(&self, item: Arc<HubItem>) {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        let i = heap.len();
        item.index.store(i, Ordering::Relaxed);
        heap.push(item);
        sift_up(&mut heap, i);
    }

    /// Remove a hub from the pool; a no-op if it is already detached
    pub fn remove(&self, item: &Arc<HubItem>) {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        let i = item.index.load(Ordering::Relaxed);
        if i == DETACHED {
            return;
        }
        debug_assert!(Arc::ptr_eq(&heap[i], item));

        let last = heap.len() - 1;
        heap.swap(i, last);
        heap.pop();
        item.index.store(DETACHED, Ordering::Relaxed);
        if i < heap.len() {
            heap[i].index.store(i, Ordering::Relaxed);
            fix(&mut heap, i);
        }
    }

    /// Pick the least-loaded hub and admit one link to it, atomically.
    /// `None` when the pool is empty.
    pub fn fetch_least_loaded(&self) -> Option<Arc<HubItem>> {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        if heap.is_empty() {
            return None;
        }
        let item = heap[0].clone();
        item.priority.fetch_add(1, Ordering::Relaxed);
        sift_down(&mut heap, 0);
        Some(item)
    }

    /// Undo one admission. A no-op when the hub has already been
    /// removed from the pool (it never re-enters).
    pub fn drop_load(&self, item: &HubItem) {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        let i = item.index.load(Ordering::Relaxed);
        if i == DETACHED {
            return;
        }
        item.priority.fetch_sub(1, Ordering::Relaxed);
        fix(&mut heap, i);
    }

    pub fn len(&self) -> usize {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load of every pooled hub, unordered
    pub fn loads(&self) -> Vec<i64> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|item| item.load())
            .collect()
    }

    /// Log a health summary of every pooled hub
    pub fn status(&self) {
        let items: Vec<Arc<HubItem>> = self
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for item in items {
            tracing::info!(load = item.load(), "pool member");
            item.hub().status();
        }
    }

    #[cfg(test)]
    fn assert_valid(&self) {
        let heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, item) in heap.iter().enumerate() {
            assert_eq!(item.index.load(Ordering::Relaxed), i, "index out of date");
            if i > 0 {
                let parent = (i - 1) / 2;
                assert!(
                    heap[parent].load() <= item.load(),
                    "heap property violated at {}",
                    i
                );
            }
        }
    }
}

impl Default for HubPool {
    fn default() -> Self {
        Self::new()
    }
}

fn less(a: &HubItem, b: &HubItem) -> bool {
    a.priority.load(Ordering::Relaxed) < b.priority.load(Ordering::Relaxed)
}

fn swap_items(heap: &mut [Arc<HubItem>], i: usize, j: usize) {
    heap.swap(i, j);
    heap[i].index.store(i, Ordering::Relaxed);
    heap[j].index.store(j, Ordering::Relaxed);
}

fn sift_up(heap: &mut [Arc<HubItem>], mut i: usize) -> usize {
    while i > 0 {
        let parent = (i - 1) / 2;
        if !less(&heap[i], &heap[parent]) {
            break;
        }
        swap_items(heap, i, parent);
        i = parent;
    }
    i
}

fn sift_down(heap: &mut [Arc<HubItem>], mut i: usize) {
    loop {
        let left = 2 * i + 1;
        let right = left + 1;
        let mut smallest = i;
        if left < heap.len() && less(&heap[left], &heap[smallest]) {
            smallest = left;
        }
        if right < heap.len() && less(&heap[right], &heap[smallest]) {
            smallest = right;
        }
        if smallest == i {
            break;
        }
        swap_items(heap, i, smallest);
        i = smallest;
    }
}

/// Restore the heap property around position `i` after its key changed
fn fix(heap: &mut [Arc<HubItem>], i: usize) {
    let i = sift_up(heap, i);
    sift_down(heap, i);
}
