//! A generational arena over [`slab::Slab`].
//!
//! Every index-linked structure in this crate (list chains, behind-lists and
//! the cursor registry) stores its nodes in an [`Arena`]. Nodes refer to each
//! other by [`Key`], and a key carries the generation of the slot it was
//! issued for, so a key that outlives its node is recognized as stale instead
//! of silently resolving to whatever now occupies the slot.
use core::fmt;
use slab::Slab;

/// Opaque handle to a slot in an [`Arena`]. Encodes the slot index and the
/// slot's generation at the time the key was issued.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key(u64);

pub(crate) struct Arena<T> {
    slab: Slab<T>,
    /// The current generation of every slot the slab has ever handed out,
    /// occupied or not.
    generations: Vec<u32>,
}

// === impl Key ===

impl Key {
    /// Packed representation of "no key", for storing an `Option<Key>` in an
    /// atomic.
    pub(crate) const NONE_BITS: u64 = u64::MAX;

    #[inline]
    const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    #[inline]
    pub(crate) const fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub(crate) const fn into_bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_bits(bits: u64) -> Option<Self> {
        if bits == Self::NONE_BITS {
            None
        } else {
            Some(Self(bits))
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}v{})", self.index(), self.generation())
    }
}

// === impl Arena ===

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slab: Slab::new(),
            generations: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn insert(&mut self, value: T) -> Key {
        let entry = self.slab.vacant_entry();
        let index = entry.key();
        // `u32::MAX` is never issued as an index, so `Key::NONE_BITS` can
        // never be a valid key.
        assert!(index < u32::MAX as usize, "arena capacity overflow");
        if index == self.generations.len() {
            self.generations.push(0);
        }
        let generation = self.generations[index];
        entry.insert(value);
        Key::new(index as u32, generation)
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let index = key.index() as usize;
        if self.generations.get(index) != Some(&key.generation()) {
            return None;
        }
        let value = self.slab.try_remove(index)?;
        // Bumping the generation invalidates every outstanding key for the
        // slot.
        self.generations[index] = key.generation().wrapping_add(1);
        Some(value)
    }

    #[inline]
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        let index = key.index() as usize;
        if self.generations.get(index) != Some(&key.generation()) {
            return None;
        }
        self.slab.get(index)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let index = key.index() as usize;
        if self.generations.get(index) != Some(&key.generation()) {
            return None;
        }
        self.slab.get_mut(index)
    }

    #[inline]
    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over every occupied slot, in slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        self.slab
            .iter()
            .map(|(index, value)| (Key::new(index as u32, self.generations[index]), value))
    }

    pub(crate) fn clear(&mut self) {
        self.slab.clear();
        for generation in &mut self.generations {
            *generation = generation.wrapping_add(1);
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_keys_do_not_resolve() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));

        let b = arena.insert("b");
        assert_eq!(a.index(), b.index(), "vacant slot must be reused");
        assert_ne!(a, b);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut arena = Arena::new();
        let keys = (0..4).map(|i| arena.insert(i)).collect::<Vec<_>>();
        arena.remove(keys[1]);
        arena.remove(keys[3]);

        assert_eq!(arena.insert(10).index(), keys[3].index());
        assert_eq!(arena.insert(11).index(), keys[1].index());
        assert_eq!(arena.insert(12).index(), 4);
        assert_eq!(arena.len(), 5);
    }

    #[test]
    fn clear_invalidates_keys() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        arena.clear();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(b), None);

        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(arena.iter().collect::<Vec<_>>(), vec![(c, &"c")]);
    }

    #[test]
    fn key_bits() {
        let key = Key::new(7, 3);
        assert_eq!(Key::from_bits(key.into_bits()), Some(key));
        assert_eq!(Key::from_bits(Key::NONE_BITS), None);
    }
}
