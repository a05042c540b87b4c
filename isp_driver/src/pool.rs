//! Fixed-capacity slot pools.
//!
//! A `SlotPool` models a bank of identical hardware units (processor blocks,
//! or the AF/AWB/AE units of one processor). Free slots are tracked in a
//! `u32` bitmap so allocation is a single `trailing_zeros`. Every slot carries
//! a generation that is bumped on free, which lets handles detect reuse.
//!
//! Pools are not synchronized; the driver keeps them behind its registry lock.

use isp_common::isp::error::{IspError, IspResult};

/// One slot: the generation of its current (or next) occupant plus the entry.
#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

/// Fixed-capacity allocator with at most `N` slots.
#[derive(Debug)]
pub struct SlotPool<T, const N: usize> {
    /// Pool name used in `Exhausted` errors
    resource: &'static str,
    slots: heapless::Vec<Slot<T>, N>,
    /// Bit `i` set means slot `i` is free
    free: u32,
}

impl<T, const N: usize> SlotPool<T, N> {
    /// Create a pool with `capacity` slots (clamped to `N`).
    pub fn new(resource: &'static str, capacity: usize) -> Self {
        let capacity = capacity.min(N).min(32);
        let mut slots = heapless::Vec::new();
        for _ in 0..capacity {
            // capacity <= N, so every push fits.
            let _ = slots.push(Slot {
                generation: 0,
                entry: None,
            });
        }
        let free = if capacity == 32 {
            u32::MAX
        } else {
            (1u32 << capacity) - 1
        };
        Self {
            resource,
            slots,
            free,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.capacity() - self.free.count_ones() as usize
    }

    /// True when no slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every slot is occupied.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free == 0
    }

    /// Slot index and generation the next `allocate` would return.
    ///
    /// # Errors
    /// `IspError::Exhausted` if the pool is full.
    pub fn next_free(&self) -> IspResult<(u8, u32)> {
        if self.free == 0 {
            return Err(IspError::Exhausted {
                resource: self.resource,
                capacity: self.capacity(),
            });
        }
        let slot = self.free.trailing_zeros() as usize;
        Ok((slot as u8, self.slots[slot].generation))
    }

    /// Place `value` in the lowest free slot.
    ///
    /// Returns `(slot, generation)`. On `Exhausted` the pool is untouched.
    pub fn allocate(&mut self, value: T) -> IspResult<(u8, u32)> {
        let (slot, generation) = self.next_free()?;
        self.free &= !(1u32 << slot);
        self.slots[slot as usize].entry = Some(value);
        Ok((slot, generation))
    }

    /// Entry at `slot` if it is occupied by `generation`.
    pub fn get(&self, slot: u8, generation: u32) -> Option<&T> {
        self.slots
            .get(slot as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_ref())
    }

    /// Mutable entry at `slot` if it is occupied by `generation`.
    pub fn get_mut(&mut self, slot: u8, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(slot as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_mut())
    }

    /// Free `slot` if it is occupied by `generation`, returning the entry.
    ///
    /// The slot generation is bumped so outstanding handles become stale.
    pub fn free(&mut self, slot: u8, generation: u32) -> Option<T> {
        let s = self.slots.get_mut(slot as usize)?;
        if s.generation != generation {
            return None;
        }
        let entry = s.entry.take()?;
        s.generation = s.generation.wrapping_add(1);
        self.free |= 1u32 << slot;
        Some(entry)
    }

    /// Iterate occupied slots as `(slot, generation, entry)`.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.entry.as_ref().map(|e| (i as u8, s.generation, e)))
    }

    /// Iterate occupied slots mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u8, u32, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.entry.as_mut().map(|e| (i as u8, s.generation, e)))
    }
}
