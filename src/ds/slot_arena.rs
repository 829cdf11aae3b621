//! Epoch-tagged slot arena.
//!
//! Stores values in a `Vec` of slots and hands out [`SlotId`] handles made of
//! a slot index plus the slot's epoch at insertion time. Removing a value bumps
//! the slot's epoch, so a handle kept by someone else (an index, a bucket
//! member list) stops resolving the moment its value is gone, even after the
//! slot has been reused for a different value.
//!
//! ```text
//!   slots: Vec<Slot<T>>
//!   ┌─────┬───────┬──────────────┐
//!   │ idx │ epoch │ value        │
//!   ├─────┼───────┼──────────────┤
//!   │  0  │   3   │ Some(room 7) │ ◄── SlotId { 0, 3 } resolves
//!   │  1  │   1   │ None         │ ◄── SlotId { 1, 0 } is dead
//!   │  2  │   0   │ Some(room 9) │
//!   └─────┴───────┴──────────────┘
//!   free_list: [1]
//! ```

/// Handle to a value stored in a [`SlotArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    epoch: u64,
}

impl SlotId {
    /// Returns the slot index.
    pub fn index(self) -> usize {
        self.index
    }

    /// Returns the slot epoch this handle was issued for.
    pub fn epoch(self) -> u64 {
        self.epoch
    }
}

#[derive(Debug)]
struct Slot<T> {
    epoch: u64,
    value: Option<T>,
}

/// Slot storage with stable, epoch-checked handles and slot reuse.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<usize>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        let index = if let Some(index) = self.free_list.pop() {
            self.slots[index].value = Some(value);
            index
        } else {
            self.slots.push(Slot {
                epoch: 0,
                value: Some(value),
            });
            self.slots.len() - 1
        };
        self.len += 1;
        SlotId {
            index,
            epoch: self.slots[index].epoch,
        }
    }

    /// Removes the value behind `id`; stale handles return `None`.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.epoch != id.epoch {
            return None;
        }
        let value = slot.value.take()?;
        slot.epoch += 1;
        self.free_list.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.epoch == id.epoch)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.epoch == id.epoch)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every value. Slots are kept and their epochs bumped, so handles
    /// issued before the clear never resolve again.
    pub fn clear(&mut self) {
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.epoch += 1;
            }
            self.free_list.push(index);
        }
        // pop() hands out low indices first
        self.free_list.reverse();
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotId {
                        index,
                        epoch: slot.epoch,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
