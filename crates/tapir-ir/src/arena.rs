//! Arena-based storage with typed handles.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`].
///
/// Handles are lightweight identifiers (u32 index) that provide
/// type-safe access to arena-allocated values. Handles stay valid
/// when other slots are retired.
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    /// Creates a new handle from a zero-based index.
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An arena with typed [`Handle`]-based access and tombstoned removal.
///
/// Slots are never reused: retiring a handle leaves a tombstone so that
/// all other handles remain stable. Iteration skips retired slots.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<Option<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the number of live (non-retired) elements.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if the arena contains no live elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the handle that will be assigned to the next appended value.
    pub fn next_handle(&self) -> Handle<T> {
        let index = u32::try_from(self.data.len()).unwrap_or_else(|_| {
            panic!("arena overflow: {} items exceeds u32::MAX", self.data.len())
        });
        Handle::new(index)
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.data.push(Some(value));
        handle
    }

    /// Retires the slot behind `handle`, leaving a tombstone.
    ///
    /// # Panics
    ///
    /// Panics if the handle is out of bounds or already retired.
    pub fn retire(&mut self, handle: Handle<T>) -> T {
        self.data[handle.index()]
            .take()
            .unwrap_or_else(|| panic!("retire: handle {handle:?} already retired"))
    }

    /// Returns `true` if the handle points at a live slot.
    pub fn is_live(&self, handle: Handle<T>) -> bool {
        matches!(self.data.get(handle.index()), Some(Some(_)))
    }

    /// Returns a reference to the value if the handle is valid and live.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index()).and_then(|slot| slot.as_ref())
    }

    /// Iterates over `(handle, &value)` pairs of live slots.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // Safety: arena size bounded by u32::MAX (enforced in append)
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (Handle::new(i as u32), v)))
    }

    /// Iterates over `(handle, &mut value)` pairs of live slots.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        // Safety: arena size bounded by u32::MAX (enforced in append)
        self.data
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (Handle::new(i as u32), v)))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.data[handle.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("access to retired handle {handle:?}"))
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.data[handle.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("access to retired handle {handle:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_append_and_access() {
        let mut arena = Arena::new();
        let h0 = arena.append("hello");
        let h1 = arena.append("world");
        assert_eq!(arena[h0], "hello");
        assert_eq!(arena[h1], "world");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn arena_retire_leaves_tombstone() {
        let mut arena = Arena::new();
        let h0 = arena.append(10);
        let h1 = arena.append(20);
        assert_eq!(arena.retire(h0), 10);
        assert!(!arena.is_live(h0));
        assert!(arena.is_live(h1));
        assert_eq!(arena.len(), 1);
        // Handles of live slots are unaffected.
        assert_eq!(arena[h1], 20);
        // Retired slots are skipped by iteration.
        let items: Vec<_> = arena.iter().map(|(_, &v)| v).collect();
        assert_eq!(items, vec![20]);
        // New appends never reuse the retired slot.
        let h2 = arena.append(30);
        assert_ne!(h0, h2);
    }

    #[test]
    #[should_panic(expected = "already retired")]
    fn arena_double_retire_panics() {
        let mut arena = Arena::new();
        let h = arena.append(1);
        arena.retire(h);
        arena.retire(h);
    }

    #[test]
    fn arena_next_handle() {
        let mut arena = Arena::<i32>::new();
        let h0 = arena.next_handle();
        assert_eq!(h0.index(), 0);
        arena.append(42);
        let h1 = arena.next_handle();
        assert_eq!(h1.index(), 1);
    }

    #[test]
    fn handle_ordering() {
        let h0: Handle<u32> = Handle::new(0);
        let h1: Handle<u32> = Handle::new(1);
        assert!(h0 < h1);
        assert_eq!(h0, h0);
    }

    #[test]
    fn arena_try_get() {
        let mut arena = Arena::new();
        let h0 = arena.append(42);
        assert_eq!(arena.try_get(h0), Some(&42));
        assert_eq!(arena.try_get(Handle::new(99)), None);
    }
}
