//! Link id allocation and the link table
//!
//! Each hub owns a bounded namespace of 16-bit link ids. An id is
//! either in the free list or bound to exactly one live link in the
//! table; id 0 is the reserved "no link" value and is never handed out.

use std::sync::{Mutex, PoisonError};

/// Identifier of one logical link inside a hub
pub type LinkId = u16;

/// Bounded pool of free link ids
pub struct IdAllocator {
    free: Mutex<Vec<LinkId>>,
}

impl IdAllocator {
    /// Pre-fill the free list with `1..capacity`
    pub fn new(capacity: u16) -> Self {
        Self {
            free: Mutex::new((1..capacity).collect()),
        }
    }

    /// Take some free id, or `None` when the namespace is exhausted.
    /// Never blocks beyond the free-list lock.
    pub fn acquire(&self) -> Option<LinkId> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Return an id to the free list
    pub fn release(&self, id: LinkId) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    /// Number of ids currently free
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Dense table mapping link id to a per-link handle
pub struct LinkTable<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T: Clone> LinkTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    /// Bind `value` to `id`; fails if the slot is occupied. A false
    /// return means an id was handed out twice.
    pub fn set(&self, id: LinkId, value: T) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut slots[id as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Current occupant of `id`, if any
    pub fn get(&self, id: LinkId) -> Option<T> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)[id as usize].clone()
    }

    /// Clear `id`; fails if the slot is already empty.
    pub fn reset(&self, id: LinkId) -> bool {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)[id as usize]
            .take()
            .is_some()
    }

    /// Empty every slot, returning the occupants. Used at hub teardown.
    pub fn drain(&self) -> Vec<T> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    /// Number of occupied slots
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.is_some())
            .count()
    }
}
