//! Active range window
//!
//! Holds the ranges a sweep has seen that may still contain a later point.
//! Entries live in a slot arena; a ring of slot indices keeps them in arrival
//! order, and evicted slots go to a free list to be overwritten by the next
//! activation instead of being reallocated.

use std::collections::VecDeque;

use crate::Address;

/// Default number of slots the window starts with and shrinks back to
pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// Default number of slots added whenever the window is full
pub const DEFAULT_GROW_INCREMENT: usize = 1000;

/// A range held by the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRange<V> {
    /// First address of the range
    pub begin: Address,
    /// Last address of the range
    pub end: Address,
    /// Value carried with the range
    pub value: V,
}

impl<V> ActiveRange<V> {
    /// Whether `addr` lies inside the range
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin && addr <= self.end
    }
}

/// FIFO window of ranges not yet passed by the sweep
#[derive(Debug, Clone)]
pub struct ActiveRangeWindow<V> {
    /// Slot arena; live slots are listed in `order`, the rest in `free`
    slots: Vec<ActiveRange<V>>,
    free: Vec<usize>,
    order: VecDeque<usize>,
    /// Smallest end among live entries, meaningless when empty
    min_end: Address,
    capacity: usize,
    baseline: usize,
    grow_by: usize,
    resizes: u64,
    peak: usize,
}

impl<V> Default for ActiveRangeWindow<V> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY, DEFAULT_GROW_INCREMENT)
    }
}

impl<V> ActiveRangeWindow<V> {
    /// Create a window with `baseline` slots that grows by `grow_by` slots
    pub fn new(baseline: usize, grow_by: usize) -> Self {
        let grow_by = grow_by.max(1);
        Self {
            slots: Vec::with_capacity(baseline),
            free: Vec::new(),
            order: VecDeque::with_capacity(baseline),
            min_end: Address::MAX,
            capacity: baseline,
            baseline,
            grow_by,
            resizes: 0,
            peak: 0,
        }
    }

    /// Number of live ranges
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window holds no ranges
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Current slot capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times the window has grown
    pub fn resize_count(&self) -> u64 {
        self.resizes
    }

    /// Largest number of live ranges seen at once
    pub fn peak_len(&self) -> usize {
        self.peak
    }

    /// Append a range. Returns `true` if the window had to grow to fit it.
    pub fn activate(&mut self, begin: Address, end: Address, value: V) -> bool {
        let grew = self.order.len() >= self.capacity;
        if grew {
            self.capacity += self.grow_by;
            self.order.reserve(self.capacity - self.order.len());
            self.resizes += 1;
        }

        let entry = ActiveRange { begin, end, value };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = entry;
                slot
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        };

        self.min_end = if self.order.is_empty() {
            end
        } else {
            self.min_end.min(end)
        };
        self.order.push_back(slot);
        self.peak = self.peak.max(self.order.len());
        grew
    }

    /// Remove every range ending before `point`. Returns how many were removed.
    ///
    /// Ranges arrive ordered by begin, not by end, so an expired range may sit
    /// behind a live one; the whole window is scanned unless the smallest
    /// live end proves nothing has expired.
    pub fn evict(&mut self, point: Address) -> usize {
        if self.order.is_empty() || self.min_end >= point {
            return 0;
        }

        let before = self.order.len();
        let slots = &self.slots;
        let free = &mut self.free;
        let mut min_end = Address::MAX;
        self.order.retain(|&slot| {
            let end = slots[slot].end;
            if end < point {
                free.push(slot);
                false
            } else {
                min_end = min_end.min(end);
                true
            }
        });
        self.min_end = min_end;

        let removed = before - self.order.len();
        if self.order.is_empty() {
            self.release();
        }
        removed
    }

    /// Iterate over live ranges in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &ActiveRange<V>> + '_ {
        self.order.iter().map(move |&slot| &self.slots[slot])
    }

    /// Drop every range and shrink back to the baseline capacity
    pub fn clear(&mut self) {
        self.order.clear();
        self.release();
    }

    /// Return all slots to the allocator's baseline once the window is empty
    fn release(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.min_end = Address::MAX;
        if self.capacity > self.baseline {
            self.capacity = self.baseline;
            self.slots.shrink_to(self.baseline);
            self.free.shrink_to(self.baseline);
            self.order.shrink_to(self.baseline);
        }
    }
}
