use alloc::vec::Vec;

/// Provides a generational arena.
///
/// A slotmap provides a `Vec`-like interface where each entry is associated with a stable
/// index-like key. Lookup with the key will detect if an entry has been removed but does not
/// require any lifetime relation.
///
/// ## Usage
///
/// ```
/// # use ethox_tcp::managed::SlotMap;
/// let mut map = SlotMap::new();
/// let index = map.insert(42);
/// assert_eq!(map.get(index).cloned(), Some(42));
/// assert_eq!(map.remove(index), Some(42));
/// assert!(map.get(index).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. Accessing the slotmap with the index after
/// the entry was removed will fail, even if the slot where the element was previously stored has
/// been reused for another element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    idx: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    /// Advanced on each removal.
    generation: u32,
    element: Option<T>,
}

impl<T> SlotMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        SlotMap {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no live elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Retrieve a value by index.
    pub fn get(&self, index: Key) -> Option<&T> {
        let slot = self.slots.get(index.idx)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.element.as_ref()
    }

    /// Retrieve a mutable value by index.
    pub fn get_mut(&mut self, index: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(index.idx)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.element.as_mut()
    }

    /// Check if the key refers to a live element.
    pub fn contains(&self, index: Key) -> bool {
        self.get(index).is_some()
    }

    /// Insert a value into the map, returning its new key.
    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;
        match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.slots[idx];
                debug_assert!(slot.element.is_none());
                slot.element = Some(value);
                Key { idx, generation: slot.generation }
            },
            None => {
                let idx = self.slots.len();
                self.slots.push(Slot { generation: 0, element: Some(value) });
                Key { idx, generation: 0 }
            },
        }
    }

    /// Remove an element.
    ///
    /// Returns the element if the key was valid. The slot is reused by later inserts but the key
    /// stays invalid forever (modulo generation counter wrap around).
    pub fn remove(&mut self, index: Key) -> Option<T> {
        let slot = self.slots.get_mut(index.idx)?;
        if slot.generation != index.generation {
            return None;
        }
        let element = slot.element.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index.idx);
        self.len -= 1;
        Some(element)
    }

    /// Keys of all live elements, in slot order.
    pub fn keys(&self) -> impl Iterator<Item=Key> + '_ {
        self.slots.iter()
            .enumerate()
            .filter(|(_, slot)| slot.element.is_some())
            .map(|(idx, slot)| Key { idx, generation: slot.generation })
    }

    /// Iterate over all live elements and their keys.
    pub fn iter(&self) -> impl Iterator<Item=(Key, &T)> + '_ {
        self.slots.iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let key = Key { idx, generation: slot.generation };
                slot.element.as_ref().map(|el| (key, el))
            })
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        SlotMap::new()
    }
}
