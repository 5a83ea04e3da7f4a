//! Duplicate suppression cache.
//!
//! The radio layer delivers the same logical frame many times (repeats,
//! multiple relayers in range). The cache remembers recently seen
//! (sender, packet id) pairs in a fixed-capacity ring so each frame is
//! decoded at most once; the oldest entry is overwritten when the ring is
//! full.
//!
//! Single-writer: the cache is only touched from the inspector's
//! synchronous call path and is not reentrant-safe by itself. A
//! multi-threaded caller must serialize access externally.

use log::{info, warn};

/// Step used when walking the requested capacity down after a failed
/// reservation.
const ALLOC_STEP: usize = 10;

/// Dedup key for one logical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIdentity {
    pub sender: u32,
    pub packet_id: u32,
}

/// Bounded ring of [`PacketIdentity`] values, insertion order = arrival
/// order.
///
/// Capacity is fixed at construction. A capacity of zero means the
/// reservation failed entirely; the cache then runs in pass-through mode
/// where nothing is ever reported as seen.
pub struct PacketCache {
    slots: Vec<PacketIdentity>,
    capacity: usize,
    next: usize,
}

impl PacketCache {
    /// Reserve storage for up to `capacity_hint` identities, degrading to
    /// the largest reservation that succeeds (down to zero).
    ///
    /// Storage is reserved exactly once; the ring never reallocates.
    pub fn new(capacity_hint: usize) -> Self {
        let mut slots = Vec::new();
        let mut target = capacity_hint;
        while target > 0 {
            match slots.try_reserve_exact(target) {
                Ok(()) => break,
                Err(_) => target = target.saturating_sub(ALLOC_STEP),
            }
        }
        if target == 0 && capacity_hint > 0 {
            warn!("packet cache disabled: could not reserve any slots (pass-through mode)");
        } else if target < capacity_hint {
            info!("packet cache degraded to {target} of {capacity_hint} requested slots");
        }
        Self { slots, capacity: target, next: 0 }
    }

    /// Number of occupied slots, saturating at capacity.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Linear membership scan over the occupied slots.
    pub fn contains(&self, identity: PacketIdentity) -> bool {
        self.slots.contains(&identity)
    }

    /// Insert `identity` unless already present.
    ///
    /// Returns `true` only when the identity was inserted. A full ring
    /// overwrites its oldest entry; a zero-capacity cache refuses every
    /// insert.
    pub fn insert(&mut self, identity: PacketIdentity) -> bool {
        if self.capacity == 0 || self.contains(identity) {
            return false;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(identity);
        } else {
            self.slots[self.next] = identity;
        }
        self.next = (self.next + 1) % self.capacity;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(sender: u32, packet_id: u32) -> PacketIdentity {
        PacketIdentity { sender, packet_id }
    }

    #[test]
    fn first_insert_then_repeat() {
        let mut cache = PacketCache::new(8);
        assert!(cache.insert(id(7, 42)));
        assert!(!cache.insert(id(7, 42)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn identity_needs_both_fields() {
        let mut cache = PacketCache::new(8);
        assert!(cache.insert(id(7, 42)));
        assert!(cache.insert(id(7, 43)));
        assert!(cache.insert(id(8, 42)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn repeat_with_interleaved_identities() {
        let mut cache = PacketCache::new(16);
        assert!(cache.insert(id(1, 1)));
        for n in 2..10 {
            assert!(cache.insert(id(1, n)));
        }
        assert!(!cache.insert(id(1, 1)));
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut cache = PacketCache::new(4);
        for n in 0..32 {
            cache.insert(id(0, n));
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn oldest_evicted_when_full() {
        let mut cache = PacketCache::new(4);
        for n in 0..5 {
            assert!(cache.insert(id(9, n)));
        }
        // Inserting capacity + 1 distinct identities pushed out the first.
        assert!(!cache.contains(id(9, 0)));
        for n in 1..5 {
            assert!(cache.contains(id(9, n)));
        }
        // The evicted identity counts as unseen again.
        assert!(cache.insert(id(9, 0)));
    }

    #[test]
    fn zero_capacity_is_pass_through() {
        let mut cache = PacketCache::new(0);
        assert_eq!(cache.capacity(), 0);
        assert_eq!(cache.len(), 0);
        assert!(!cache.insert(id(1, 1)));
        assert!(!cache.contains(id(1, 1)));
        assert_eq!(cache.len(), 0);
    }
}
