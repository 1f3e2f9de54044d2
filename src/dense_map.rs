//! A hash map storing its entries in two packed, index-aligned arrays.
//!
//! Keys live in one array and values in another, both filled from position
//! `0` to `len() - 1` with no gaps. A [`HashIndex`] maps each key's hash to
//! its dense position. Removal keeps the arrays packed, either by moving the
//! last entry into the hole ([`Mode::Fast`]) or by shifting the tail down one
//! position ([`Mode::Stable`]), which preserves insertion order.

use core::borrow::Borrow;
use core::fmt;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

use crate::hash_index::CapacityError;
#[cfg(any(test, feature = "stats"))]
use crate::hash_index::DebugStats;
use crate::hash_index::HashIndex;
use crate::hash_index::MAX_ENTRIES;
#[cfg(any(test, feature = "stats"))]
use crate::hash_index::ProbeHistogram;
use crate::storage::Storage;

/// Dense storage never allocates fewer entries than this when it first grows.
const MIN_DENSE_CAPACITY: usize = 4;

/// How a [`DenseMap`] closes the gap left by a removed entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Move the last entry into the hole. O(1), reorders entries.
    #[default]
    Fast,
    /// Shift every later entry down one position. O(n), keeps the remaining
    /// entries in insertion order.
    Stable,
}

/// # Safety
///
/// Every element of `slice` must be initialized.
#[inline(always)]
unsafe fn assume_init<T>(slice: &[MaybeUninit<T>]) -> &[T] {
    // SAFETY: `MaybeUninit<T>` has the layout of `T` and the caller
    // guarantees initialization.
    unsafe { core::slice::from_raw_parts(slice.as_ptr().cast(), slice.len()) }
}

/// # Safety
///
/// Every element of `slice` must be initialized.
#[inline(always)]
unsafe fn assume_init_mut<T>(slice: &mut [MaybeUninit<T>]) -> &mut [T] {
    // SAFETY: As in `assume_init`.
    unsafe { core::slice::from_raw_parts_mut(slice.as_mut_ptr().cast(), slice.len()) }
}

#[inline(always)]
fn hash_of<Q: Hash + ?Sized, S: BuildHasher>(hash_builder: &S, key: &Q) -> u32 {
    hash_builder.hash_one(key) as u32
}

/// A hash map with packed key and value arrays.
///
/// `A` selects the storage: [`InlineStorage`] for a fixed number of entries
/// held inside the map, or [`HeapStorage`] for a map that grows by doubling.
/// The crate root provides the [`FixedMap`] and [`Map`] aliases for the two.
///
/// Entries can be reached by key through the hash index, or by dense
/// position through [`key_at`](Self::key_at), [`value_at`](Self::value_at)
/// and the [`keys`](Self::keys) / [`values`](Self::values) slices. Positions
/// are only stable across removals in [`Mode::Stable`].
///
/// # Examples
///
/// ```rust
/// use dense_map::FixedMap;
/// use dense_map::Mode;
///
/// let mut map: FixedMap<u32, &str, 4> = FixedMap::with_mode(Mode::Stable);
/// map.insert(3, "c");
/// map.insert(1, "a");
/// map.insert(2, "b");
///
/// assert_eq!(map.remove(&3), Some("c"));
/// assert_eq!(map.keys(), &[1, 2]);
/// assert_eq!(map.values(), &["a", "b"]);
/// ```
///
/// [`InlineStorage`]: crate::storage::InlineStorage
/// [`HeapStorage`]: crate::storage::HeapStorage
/// [`FixedMap`]: crate::FixedMap
/// [`Map`]: crate::Map
pub struct DenseMap<K, V, S, A: Storage<K, V>> {
    storage: A,
    index: HashIndex<A::Slots>,
    len: usize,
    mode: Mode,
    hash_builder: S,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, S, A: Storage<K, V>> Drop for DenseMap<K, V, S, A> {
    fn drop(&mut self) {
        self.drop_entries();
    }
}

impl<K, V, S, A: Storage<K, V>> DenseMap<K, V, S, A> {
    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of entries the dense arrays can hold without
    /// growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::FixedMap;
    ///
    /// let map: FixedMap<u8, u8, 16> = FixedMap::new();
    /// assert_eq!(map.capacity(), 16);
    /// ```
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Returns the removal mode chosen at construction.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the hash index mapping keys to dense positions.
    pub fn index(&self) -> &HashIndex<A::Slots> {
        &self.index
    }

    /// The live keys, in dense order.
    pub fn keys(&self) -> &[K] {
        // SAFETY: The first `len` keys are initialized.
        unsafe { assume_init(&self.storage.keys()[..self.len]) }
    }

    /// The live values, in dense order.
    pub fn values(&self) -> &[V] {
        // SAFETY: The first `len` values are initialized.
        unsafe { assume_init(&self.storage.values()[..self.len]) }
    }

    /// The live values, mutably, in dense order.
    pub fn values_mut(&mut self) -> &mut [V] {
        let len = self.len;
        let (_, values) = self.storage.parts_mut();
        // SAFETY: The first `len` values are initialized.
        unsafe { assume_init_mut(&mut values[..len]) }
    }

    fn entries_mut(&mut self) -> (&[K], &mut [V]) {
        let len = self.len;
        let (keys, values) = self.storage.parts_mut();
        // SAFETY: The first `len` keys and values are initialized.
        unsafe {
            (
                assume_init(&keys[..len]),
                assume_init_mut(&mut values[..len]),
            )
        }
    }

    /// Returns the key at dense position `index`.
    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.keys().get(index)
    }

    /// Returns the value at dense position `index`.
    pub fn value_at(&self, index: usize) -> Option<&V> {
        self.values().get(index)
    }

    /// Returns the value at dense position `index`, mutably.
    pub fn value_at_mut(&mut self, index: usize) -> Option<&mut V> {
        self.values_mut().get_mut(index)
    }

    /// Returns the entry at dense position `index`.
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        Some((self.keys().get(index)?, self.values().get(index)?))
    }

    /// Returns the entry at dense position `index`, with its value mutable.
    pub fn get_index_mut(&mut self, index: usize) -> Option<(&K, &mut V)> {
        let (keys, values) = self.entries_mut();
        Some((keys.get(index)?, values.get_mut(index)?))
    }

    /// Iterates over the entries in dense order.
    ///
    /// In [`Mode::Stable`] this is insertion order. In [`Mode::Fast`] the
    /// order changes after removals.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.keys().iter().zip(self.values()),
        }
    }

    /// Iterates over the entries in dense order with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let (keys, values) = self.entries_mut();
        IterMut {
            inner: keys.iter().zip(values.iter_mut()),
        }
    }

    /// Removes every entry, keeping the allocated storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<&str, i32> = Map::new();
    /// map.insert("a", 1);
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert!(map.capacity() > 0);
    /// ```
    pub fn clear(&mut self) {
        self.index.clear();
        self.drop_entries();
    }

    /// Removes every entry, yielding them by value in dense order.
    ///
    /// The map is empty as soon as the iterator is created. Entries the
    /// iterator does not yield are dropped with it.
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        let len = core::mem::replace(&mut self.len, 0);
        self.index.clear();
        let (keys, values) = self.storage.parts_mut();
        Drain {
            keys: keys[..len].iter_mut(),
            values: values[..len].iter_mut(),
        }
    }

    fn drop_entries(&mut self) {
        // The length is reset first so a panicking destructor leaks the
        // remaining entries instead of dropping them twice.
        let len = core::mem::replace(&mut self.len, 0);
        let (keys, values) = self.storage.parts_mut();
        // SAFETY: The first `len` entries were initialized and, with the
        // length reset, are no longer reachable through the map.
        unsafe {
            core::ptr::drop_in_place(assume_init_mut(&mut keys[..len]));
            core::ptr::drop_in_place(assume_init_mut(&mut values[..len]));
        }
    }

    /// Returns utilization statistics for the map's index and arrays.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let mut stats = self.index.debug_stats();
        stats.dense_bytes = self.storage.allocated_bytes();
        stats
    }

    /// Returns a histogram of probe lengths in the map's index.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        self.index.probe_histogram()
    }
}

impl<K, V, S, A> DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: Storage<K, V>,
{
    /// Creates an empty map with the given hasher builder and
    /// [`Mode::Fast`] removal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use dense_map::Map;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: Map<i32, String, _> = Map::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_mode_and_hasher(Mode::Fast, hash_builder)
    }

    /// Creates an empty map with the given removal mode and hasher builder.
    pub fn with_mode_and_hasher(mode: Mode, hash_builder: S) -> Self {
        Self {
            storage: A::new(),
            index: HashIndex::new(),
            len: 0,
            mode,
            hash_builder,
            _marker: PhantomData,
        }
    }

    /// Creates an empty map able to hold `capacity` entries without growing.
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, CapacityError> {
        Self::try_with_capacity_mode_and_hasher(capacity, Mode::Fast, hash_builder)
    }

    /// Creates an empty map with the given removal mode, able to hold
    /// `capacity` entries without growing.
    ///
    /// # Errors
    ///
    /// Fails if a fixed-capacity map cannot hold `capacity` entries, or if
    /// `capacity` overflows the position space.
    pub fn try_with_capacity_mode_and_hasher(
        capacity: usize,
        mode: Mode,
        hash_builder: S,
    ) -> Result<Self, CapacityError> {
        Ok(Self {
            storage: A::try_with_capacity(capacity)?,
            index: HashIndex::try_with_capacity(capacity)?,
            len: 0,
            mode,
            hash_builder,
            _marker: PhantomData,
        })
    }

    /// Creates an empty map able to hold `capacity` entries without growing.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot hold `capacity` entries.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        match Self::try_with_capacity_and_hasher(capacity, hash_builder) {
            Ok(map) => map,
            Err(err) => panic!("{err}"),
        }
    }

    fn find<Q>(&self, hash: u32, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if self.len == 0 {
            return None;
        }
        let keys = self.keys();
        self.index
            .get(hash, |position| keys[position as usize].borrow() == key)
            .map(|position| position as usize)
    }

    /// Inserts a key-value pair, or replaces the value of an existing key.
    ///
    /// New keys are appended at the end of the dense arrays. Updating a key
    /// keeps its position.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Exhausted`] if a fixed-capacity map is full
    /// and `key` is new, or [`CapacityError::Overflow`] if the map cannot
    /// grow any further. The key and value are dropped in that case.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, CapacityError> {
        let hash = hash_of(&self.hash_builder, &key);
        if let Some(position) = self.find(hash, &key) {
            let (_, values) = self.entries_mut();
            return Ok(Some(core::mem::replace(&mut values[position], value)));
        }

        self.try_grow_for_insert()?;
        let position = self.len;
        self.index.try_insert_unique(hash, position as u32)?;

        let (keys, values) = self.storage.parts_mut();
        keys[position].write(key);
        values[position].write(value);
        self.len += 1;
        Ok(None)
    }

    /// Inserts a key-value pair, returning the previous value of the key.
    ///
    /// # Panics
    ///
    /// Panics if a fixed-capacity map is full and `key` is new.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<i32, &str> = Map::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.try_insert(key, value) {
            Ok(previous) => previous,
            Err(err) => panic!("{err}"),
        }
    }

    fn try_grow_for_insert(&mut self) -> Result<(), CapacityError> {
        let capacity = self.storage.capacity();
        if self.len < capacity {
            return Ok(());
        }
        if self.len >= MAX_ENTRIES {
            return Err(CapacityError::Overflow);
        }

        let grown = capacity
            .saturating_mul(2)
            .clamp(MIN_DENSE_CAPACITY.max(self.len + 1), MAX_ENTRIES);
        self.storage.try_grow(self.len, grown)
    }

    /// Returns a reference to the value of `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.find(hash_of(&self.hash_builder, key), key)?;
        Some(&self.values()[position])
    }

    /// Returns the value of `key`, or `default` if it is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<i32, i32> = Map::new();
    /// map.insert(1, 10);
    /// assert_eq!(*map.get_or(&1, &-1), 10);
    /// assert_eq!(*map.get_or(&2, &-1), -1);
    /// ```
    pub fn get_or<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns a mutable reference to the value of `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.find(hash_of(&self.hash_builder, key), key)?;
        Some(&mut self.values_mut()[position])
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(hash_of(&self.hash_builder, key), key).is_some()
    }

    /// Returns the dense position of `key`.
    pub fn get_index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(hash_of(&self.hash_builder, key), key)
    }

    /// Removes `key`, returning its value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<i32, &str> = Map::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes `key`, returning the stored key and its value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.len == 0 {
            return None;
        }
        let hash = hash_of(&self.hash_builder, key);
        // SAFETY: The first `len` keys are initialized.
        let keys = unsafe { assume_init(&self.storage.keys()[..self.len]) };
        let position = self
            .index
            .remove(hash, |position| keys[position as usize].borrow() == key)?;
        Some(self.take(position as usize))
    }

    /// Removes the entry at dense position `index`.
    ///
    /// Returns `None` if `index >= len()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<char, i32> = Map::new();
    /// map.insert('a', 1);
    /// map.insert('b', 2);
    /// map.insert('c', 3);
    ///
    /// // Fast removal moves the last entry into the hole.
    /// assert_eq!(map.remove_index(0), Some(('a', 1)));
    /// assert_eq!(map.keys(), &['c', 'b']);
    /// ```
    pub fn remove_index(&mut self, index: usize) -> Option<(K, V)> {
        let key = self.keys().get(index)?;
        let hash = hash_of(&self.hash_builder, key);
        let removed = self.index.remove(hash, |position| position as usize == index);
        debug_assert_eq!(removed, Some(index as u32));
        Some(self.take(index))
    }

    /// Removes and returns the last entry in dense order.
    ///
    /// Never moves any other entry, in either mode.
    pub fn pop(&mut self) -> Option<(K, V)> {
        let last = self.len.checked_sub(1)?;
        self.remove_index(last)
    }

    /// Takes the entry at `position` out of the arrays, closing the gap
    /// according to the map's mode. The entry's index slot must already be
    /// gone.
    fn take(&mut self, position: usize) -> (K, V) {
        let last = self.len - 1;
        let (keys, values) = self.storage.parts_mut();

        match self.mode {
            Mode::Fast => {
                keys.swap(position, last);
                values.swap(position, last);
            }
            Mode::Stable => {
                keys[position..=last].rotate_left(1);
                values[position..=last].rotate_left(1);
            }
        }

        // SAFETY: The removed entry now sits at `last`, which is dropped
        // from the live prefix right after.
        let entry = unsafe { (keys[last].assume_init_read(), values[last].assume_init_read()) };
        self.len = last;

        if position == last {
            return entry;
        }

        // SAFETY: Positions below `last` are live.
        let live_keys = unsafe { assume_init(&keys[..last]) };
        match self.mode {
            Mode::Fast => {
                let hash = hash_of(&self.hash_builder, &live_keys[position]);
                let repointed = self.index.replace(hash, last as u32, position as u32);
                debug_assert!(repointed);
            }
            Mode::Stable => {
                let shifted = last - position;
                if shifted.saturating_mul(4) > self.index.slot_count() {
                    self.index.decrement(position as u32);
                } else {
                    for (moved, key) in live_keys.iter().enumerate().skip(position) {
                        let hash = hash_of(&self.hash_builder, key);
                        let repointed = self.index.replace(hash, moved as u32 + 1, moved as u32);
                        debug_assert!(repointed);
                    }
                }
            }
        }

        entry
    }

    /// Keeps only the entries for which `keep` returns `true`.
    ///
    /// Surviving entries keep their relative order in both modes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    ///
    /// let mut map: Map<i32, i32> = (0..8).map(|k| (k, k * 10)).collect();
    /// map.retain(|k, _| k % 2 == 0);
    /// assert_eq!(map.keys(), &[0, 2, 4, 6]);
    /// ```
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let len = core::mem::replace(&mut self.len, 0);
        self.index.clear();
        let (keys, values) = self.storage.parts_mut();

        // `self.len` tracks the compacted prefix, so a panic in `keep` or a
        // destructor leaks the unvisited tail but leaves a consistent map.
        let mut kept = 0;
        for position in 0..len {
            // SAFETY: Positions `position..len` have not been moved or
            // dropped yet.
            let retained = unsafe {
                keep(
                    keys[position].assume_init_ref(),
                    values[position].assume_init_mut(),
                )
            };

            if !retained {
                // SAFETY: As above; the entry is dropped exactly once.
                unsafe {
                    keys[position].assume_init_drop();
                    values[position].assume_init_drop();
                }
                continue;
            }

            if position != kept {
                // SAFETY: Moves a live entry into the vacated slot at
                // `kept`; the source is not read again.
                let (key, value) = unsafe {
                    (
                        keys[position].assume_init_read(),
                        values[position].assume_init_read(),
                    )
                };
                keys[kept].write(key);
                values[kept].write(value);
            }

            // SAFETY: Just written or kept in place.
            let hash = hash_of(&self.hash_builder, unsafe { keys[kept].assume_init_ref() });
            // The cleared index already has room for every entry it held.
            if let Err(err) = self.index.try_insert_unique(hash, kept as u32) {
                panic!("{err}");
            }
            kept += 1;
            self.len = kept;
        }
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// # Errors
    ///
    /// Fails if a fixed-capacity map cannot hold `len() + additional`
    /// entries, or if the total overflows the position space.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), CapacityError> {
        let required = self
            .len
            .checked_add(additional)
            .filter(|&required| required <= MAX_ENTRIES)
            .ok_or(CapacityError::Overflow)?;

        let capacity = self.storage.capacity();
        if required > capacity {
            let grown = capacity.saturating_mul(2).clamp(required, MAX_ENTRIES);
            self.storage
                .try_grow(self.len, grown)
                .or_else(|_| self.storage.try_grow(self.len, required))?;
        }
        self.index.try_reserve(additional)
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// Existing entries and their positions are unchanged and the capacity
    /// never shrinks.
    ///
    /// # Panics
    ///
    /// Panics if the map cannot hold that many entries.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            panic!("{err}");
        }
    }

    /// Replaces the contents of this map with clones of the entries of
    /// `source`, which may use a different storage.
    ///
    /// This map keeps its own mode and hasher. Entries are appended in the
    /// dense order of `source`.
    ///
    /// # Errors
    ///
    /// Fails if this map cannot hold `source.len()` entries. The map is left
    /// empty in that case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::FixedMap;
    /// use dense_map::Map;
    ///
    /// let mut source: Map<i32, i32> = Map::new();
    /// for key in 0..100 {
    ///     source.insert(key, key * 2);
    /// }
    /// source.retain(|key, _| *key < 5);
    ///
    /// let mut small: FixedMap<i32, i32, 8> = FixedMap::new();
    /// small.try_assign_from(&source).unwrap();
    /// assert_eq!(small.len(), 5);
    /// assert_eq!(small.get(&4), Some(&8));
    /// ```
    pub fn try_assign_from<S2, A2>(
        &mut self,
        source: &DenseMap<K, V, S2, A2>,
    ) -> Result<(), CapacityError>
    where
        K: Clone,
        V: Clone,
        A2: Storage<K, V>,
    {
        self.clear();
        self.try_append_unique(source.keys(), source.values())
    }

    /// Replaces the contents of this map with clones of the entries of
    /// `source`.
    ///
    /// # Panics
    ///
    /// Panics if this map cannot hold `source.len()` entries.
    pub fn assign_from<S2, A2>(&mut self, source: &DenseMap<K, V, S2, A2>)
    where
        K: Clone,
        V: Clone,
        A2: Storage<K, V>,
    {
        if let Err(err) = self.try_assign_from(source) {
            panic!("{err}");
        }
    }

    /// Appends clones of entries whose keys are known to be distinct from
    /// each other and from every key already in the map.
    fn try_append_unique(&mut self, keys: &[K], values: &[V]) -> Result<(), CapacityError>
    where
        K: Clone,
        V: Clone,
    {
        self.try_reserve(keys.len())?;
        for (key, value) in keys.iter().zip(values) {
            let hash = hash_of(&self.hash_builder, key);
            let (key, value) = (key.clone(), value.clone());
            let position = self.len;
            self.index.try_insert_unique(hash, position as u32)?;

            let (keys, values) = self.storage.parts_mut();
            keys[position].write(key);
            values[position].write(value);
            self.len += 1;
        }
        Ok(())
    }

    /// Checks that the index and the dense arrays agree on every entry.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        self.index.assert_consistent();
        assert!(self.len <= self.capacity());
        assert_eq!(self.index.len(), self.len);
        for (position, key) in self.keys().iter().enumerate() {
            assert_eq!(self.get_index_of(key), Some(position));
        }
    }
}

impl<K, V, S, A> DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    A: Storage<K, V>,
{
    /// Creates an empty map using the default hasher builder and
    /// [`Mode::Fast`] removal.
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map with the given removal mode.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::Map;
    /// use dense_map::Mode;
    ///
    /// let mut map: Map<i32, ()> = Map::with_mode(Mode::Stable);
    /// for key in 0..5 {
    ///     map.insert(key, ());
    /// }
    /// map.remove(&1);
    /// assert_eq!(map.keys(), &[0, 2, 3, 4]);
    /// ```
    pub fn with_mode(mode: Mode) -> Self {
        Self::with_mode_and_hasher(mode, S::default())
    }

    /// Creates an empty map able to hold `capacity` entries without growing.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot hold `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_mode(capacity, Mode::Fast)
    }

    /// Creates an empty map with the given removal mode, able to hold
    /// `capacity` entries without growing.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot hold `capacity` entries.
    ///
    /// ```
    /// use dense_map::Map;
    /// use dense_map::Mode;
    ///
    /// let mut map: Map<u32, u32> = Map::with_capacity_and_mode(64, Mode::Stable);
    /// let capacity = map.capacity();
    /// for key in 0..64 {
    ///     map.insert(key, key);
    /// }
    /// map.remove(&0);
    /// assert_eq!(map.capacity(), capacity);
    /// assert_eq!(map.keys()[0], 1);
    /// ```
    pub fn with_capacity_and_mode(capacity: usize, mode: Mode) -> Self {
        match Self::try_with_capacity_mode_and_hasher(capacity, mode, S::default()) {
            Ok(map) => map,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<K, V, S, A> Default for DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    A: Storage<K, V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, A> Clone for DenseMap<K, V, S, A>
where
    K: Clone,
    V: Clone,
    S: Clone,
    A: Storage<K, V>,
    A::Slots: Clone,
{
    fn clone(&self) -> Self {
        let mut storage = A::new();
        if let Err(err) = storage.try_grow(0, self.len) {
            panic!("{err}");
        }

        let mut map = Self {
            storage,
            index: self.index.clone(),
            len: 0,
            mode: self.mode,
            hash_builder: self.hash_builder.clone(),
            _marker: PhantomData,
        };

        let (keys, values) = map.storage.parts_mut();
        for (position, (key, value)) in self.iter().enumerate() {
            keys[position].write(key.clone());
            values[position].write(value.clone());
            map.len = position + 1;
        }
        map
    }

    fn clone_from(&mut self, source: &Self) {
        self.clear();
        self.mode = source.mode;
        self.hash_builder.clone_from(&source.hash_builder);
        if let Err(err) = self.storage.try_grow(0, source.len) {
            panic!("{err}");
        }

        // The index stays empty until every entry is in place, so a panicking
        // clone leaves an empty map behind.
        let (keys, values) = self.storage.parts_mut();
        let mut written = WrittenPrefix {
            keys,
            values,
            len: 0,
        };
        for (key, value) in source.iter() {
            let (key, value) = (key.clone(), value.clone());
            written.keys[written.len].write(key);
            written.values[written.len].write(value);
            written.len += 1;
        }
        let len = written.len;
        core::mem::forget(written);

        self.len = len;
        self.index.clone_from(&source.index);
    }
}

/// Entries written into uninitialized storage; dropped again on unwind.
struct WrittenPrefix<'a, K, V> {
    keys: &'a mut [MaybeUninit<K>],
    values: &'a mut [MaybeUninit<V>],
    len: usize,
}

impl<K, V> Drop for WrittenPrefix<'_, K, V> {
    fn drop(&mut self) {
        // SAFETY: The first `len` entries of both arrays were written and
        // are not owned by anything else yet.
        unsafe {
            core::ptr::drop_in_place(assume_init_mut(&mut self.keys[..self.len]));
            core::ptr::drop_in_place(assume_init_mut(&mut self.values[..self.len]));
        }
    }
}

impl<K, V, S, A> Debug for DenseMap<K, V, S, A>
where
    K: Debug,
    V: Debug,
    A: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, A, S2, A2> PartialEq<DenseMap<K, V, S2, A2>> for DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    A: Storage<K, V>,
    A2: Storage<K, V>,
{
    /// Maps are equal when they hold the same entries, in any order.
    fn eq(&self, other: &DenseMap<K, V, S2, A2>) -> bool {
        self.len == other.len
            && other
                .iter()
                .all(|(key, value)| self.get(key).is_some_and(|own| own == value))
    }
}

impl<K, V, S, A> Eq for DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
    A: Storage<K, V>,
{
}

impl<K, V, S, A> Extend<(K, V)> for DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: Storage<K, V>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S, A> FromIterator<(K, V)> for DenseMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    A: Storage<K, V>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S, A: Storage<K, V>> IntoIterator for &'a DenseMap<K, V, S, A> {
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S, A: Storage<K, V>> IntoIterator for &'a mut DenseMap<K, V, S, A> {
    type IntoIter = IterMut<'a, K, V>;
    type Item = (&'a K, &'a mut V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// An iterator over the entries of a [`DenseMap`] in dense order.
#[derive(Clone)]
pub struct Iter<'a, K, V> {
    inner: core::iter::Zip<core::slice::Iter<'a, K>, core::slice::Iter<'a, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// An iterator over the entries of a [`DenseMap`] with mutable values.
pub struct IterMut<'a, K, V> {
    inner: core::iter::Zip<core::slice::Iter<'a, K>, core::slice::IterMut<'a, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IterMut<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// A draining iterator over the entries of a [`DenseMap`].
pub struct Drain<'a, K, V> {
    keys: core::slice::IterMut<'a, MaybeUninit<K>>,
    values: core::slice::IterMut<'a, MaybeUninit<V>>,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        let value = self.values.next()?;
        // SAFETY: The drained range was live when the map handed it over and
        // each element is read exactly once.
        unsafe { Some((key.assume_init_read(), value.assume_init_read())) }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}

impl<K, V> FusedIterator for Drain<'_, K, V> {}

impl<K, V> Drop for Drain<'_, K, V> {
    fn drop(&mut self) {
        for _ in self {}
    }
}
