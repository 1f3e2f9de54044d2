use alloc::boxed::Box;
use alloc::vec;
use core::fmt;
use core::fmt::Debug;

cfg_if::cfg_if! {
    if #[cfg(feature = "density-fifty")] {
        const LOAD_NUMERATOR: usize = 1;
        const LOAD_DENOMINATOR: usize = 2;
    } else if #[cfg(feature = "density-eighty-seven-point-five")] {
        const LOAD_NUMERATOR: usize = 7;
        const LOAD_DENOMINATOR: usize = 8;
    } else {
        const LOAD_NUMERATOR: usize = 7;
        const LOAD_DENOMINATOR: usize = 10;
    }
}

/// Payload value marking an empty slot.
///
/// Payloads are dense positions, so reserving the top value caps a table at
/// `u32::MAX` entries.
const EMPTY: u32 = u32::MAX;

/// Largest number of entries any index (and therefore any map) can hold.
pub const MAX_ENTRIES: usize = EMPTY as usize;

/// Heap tables never get smaller than this once allocated.
const MIN_HEAP_SLOTS: usize = 8;

#[inline(always)]
fn target_load_factor(slots: usize) -> usize {
    ((slots as u128 * LOAD_NUMERATOR as u128) / LOAD_DENOMINATOR as u128) as usize
}

#[inline(always)]
fn target_load_factor_inverse(entries: usize) -> usize {
    ((entries as u128 * LOAD_DENOMINATOR as u128).div_ceil(LOAD_NUMERATOR as u128)) as usize
}

/// Number of heap slots needed to hold `entries` without exceeding the load
/// factor.
fn heap_slots_for(entries: usize) -> Result<usize, CapacityError> {
    if entries == 0 {
        return Ok(0);
    }
    if entries > MAX_ENTRIES {
        return Err(CapacityError::Overflow);
    }

    target_load_factor_inverse(entries)
        .max(MIN_HEAP_SLOTS)
        .checked_next_power_of_two()
        .ok_or(CapacityError::Overflow)
}

#[inline(always)]
fn home(hash: u32, slot_count: usize) -> usize {
    hash as usize % slot_count
}

#[inline(always)]
fn next(index: usize, slot_count: usize) -> usize {
    if index + 1 == slot_count { 0 } else { index + 1 }
}

/// Returns `true` if `x` lies in the cyclic interval `(start, end]`.
#[inline(always)]
fn in_cyclic_range(x: usize, start: usize, end: usize) -> bool {
    if start <= end {
        start < x && x <= end
    } else {
        start < x || x <= end
    }
}

/// First empty slot at or after the home slot of `hash`, wrapping around.
fn vacant_from(slots: &[Slot], hash: u32) -> Option<usize> {
    if slots.is_empty() {
        return None;
    }

    let mut index = home(hash, slots.len());
    for _ in 0..slots.len() {
        if slots[index].is_empty() {
            return Some(index);
        }
        index = next(index, slots.len());
    }

    None
}

/// Error returned when an index or map cannot hold the requested number of
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    /// Fixed-capacity storage is full and cannot grow.
    Exhausted {
        /// The fixed capacity that was exceeded.
        capacity: usize,
    },
    /// The requested capacity exceeds the `u32` position space or the
    /// allocation size limit.
    Overflow,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityError::Exhausted { capacity } => {
                write!(f, "fixed capacity of {capacity} entries exhausted")
            }
            CapacityError::Overflow => f.write_str("capacity overflow"),
        }
    }
}

impl core::error::Error for CapacityError {}

/// A single slot of a [`HashIndex`]: either empty or a `(hash, payload)`
/// pair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    hash: u32,
    payload: u32,
}

impl Slot {
    /// The empty slot.
    pub const EMPTY: Slot = Slot {
        hash: 0,
        payload: EMPTY,
    };

    #[inline(always)]
    fn is_empty(self) -> bool {
        self.payload == EMPTY
    }

    /// The stored hash, or `None` for an empty slot.
    pub fn hash(&self) -> Option<u32> {
        (!self.is_empty()).then_some(self.hash)
    }

    /// The stored payload, or `None` for an empty slot.
    pub fn payload(&self) -> Option<u32> {
        (!self.is_empty()).then_some(self.payload)
    }
}

impl Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("..")
        } else {
            write!(f, "{:08x}->{}", self.hash, self.payload)
        }
    }
}

/// Backing storage for the slots of a [`HashIndex`].
///
/// Implemented by [`InlineSlots`] (a fixed array living inside the index) and
/// [`HeapSlots`] (a growable heap table). All probing and deletion logic is
/// shared; a storage only decides how many slots exist and how many entries
/// they may hold.
pub trait SlotStorage: Sized {
    /// Creates the initial storage. Heap storage starts without slots.
    fn new() -> Self;

    /// Creates storage able to hold at least `entries` entries.
    fn try_with_entries(entries: usize) -> Result<Self, CapacityError>;

    /// Maximum number of entries before the storage must be replaced.
    fn max_entries(&self) -> usize;

    /// All slots.
    fn slots(&self) -> &[Slot];

    /// All slots, mutably.
    fn slots_mut(&mut self) -> &mut [Slot];
}

/// `N` slots stored inline. Never allocates and never grows; the table may
/// be filled completely.
#[derive(Clone, Copy)]
pub struct InlineSlots<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> SlotStorage for InlineSlots<N> {
    fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; N],
        }
    }

    fn try_with_entries(entries: usize) -> Result<Self, CapacityError> {
        if entries > N.min(MAX_ENTRIES) {
            return Err(CapacityError::Exhausted { capacity: N });
        }
        Ok(Self::new())
    }

    fn max_entries(&self) -> usize {
        N.min(MAX_ENTRIES)
    }

    fn slots(&self) -> &[Slot] {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }
}

/// A power-of-two heap table kept below the configured load factor.
#[derive(Clone, Default)]
pub struct HeapSlots {
    slots: Box<[Slot]>,
    max_entries: usize,
}

impl SlotStorage for HeapSlots {
    fn new() -> Self {
        Self::default()
    }

    fn try_with_entries(entries: usize) -> Result<Self, CapacityError> {
        let slot_count = heap_slots_for(entries)?;
        Ok(Self {
            slots: vec![Slot::EMPTY; slot_count].into_boxed_slice(),
            max_entries: target_load_factor(slot_count).min(MAX_ENTRIES),
        })
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn slots(&self) -> &[Slot] {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
    Full,
}

/// Debug statistics for index analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries currently stored
    pub populated: usize,
    /// Maximum number of entries before the storage must grow
    pub capacity: usize,
    /// Total number of slots in the index
    pub total_slots: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Slot utilization (populated / total_slots)
    pub slot_utilization: f64,
    /// Longest distance between an entry and its home slot
    pub max_probe_length: usize,
    /// Bytes used by the slot table
    pub index_bytes: usize,
    /// Bytes used by the dense key/value arrays, if any
    pub dense_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Dense Map Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Slot Usage: {}/{} ({:.2}% utilization)",
            self.populated,
            self.total_slots,
            self.slot_utilization * 100.0
        );
        println!("Longest probe: {}", self.max_probe_length);
        println!(
            "Memory: {} bytes index, {} bytes dense",
            self.index_bytes, self.dense_bytes
        );
    }
}

/// Histogram of probe lengths: `bins[d]` counts the entries stored `d` slots
/// past their home slot.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// Entry counts per probe distance.
    pub bins: alloc::vec::Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeHistogram {
    /// Longest probe distance with at least one entry.
    pub fn max_probe_length(&self) -> usize {
        self.bins.iter().rposition(|&count| count != 0).unwrap_or(0)
    }

    /// Pretty-prints the histogram horizontally using stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = self.bins.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!(
            "probe histogram ({} entries):",
            self.bins.iter().sum::<usize>()
        );

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];
            if units % 8 > 0 {
                bar.push(partial[units % 8 - 1]);
            }
            bar
        };

        for (distance, &count) in self.bins.iter().enumerate() {
            println!("{:>3} | {} ({})", distance, make_bar(count), count);
        }
    }
}

/// A linear-probing table mapping a hash to a small integer payload.
///
/// The index never stores keys. Every operation takes the key's hash and an
/// equality predicate over payloads, so the owner decides what a payload
/// means; [`DenseMap`] stores dense array positions and compares the key at
/// that position.
///
/// Removal uses backward-shift deletion: no tombstones are ever left behind,
/// so probe sequences stay as short as the live entries require. For every
/// entry, walking forward (with wraparound) from its home slot
/// `hash % slot_count` reaches the entry before any empty slot.
///
/// ## Example
///
/// ```rust
/// use dense_map::hash_index::HashIndex;
/// use dense_map::hash_index::InlineSlots;
///
/// // Keys hash to themselves, so the hash alone identifies a key.
/// let mut index: HashIndex<InlineSlots<5>> = HashIndex::new();
/// for key in [3u32, 4, 8, 9] {
///     assert!(index.set(key, key * 10, |_| true));
/// }
///
/// assert_eq!(index.remove(3, |_| true), Some(30));
/// assert_eq!(index.get(8, |_| true), Some(80));
/// assert_eq!(index.get(9, |_| true), Some(90));
/// assert_eq!(index.get(3, |_| true), None);
/// ```
///
/// [`DenseMap`]: crate::dense_map::DenseMap
#[derive(Clone)]
pub struct HashIndex<S = HeapSlots> {
    slots: S,
    len: usize,
}

impl<S: SlotStorage> Debug for HashIndex<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("slots", &self.slots.slots())
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<S: SlotStorage> Default for HashIndex<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SlotStorage> HashIndex<S> {
    /// Creates an empty index. Heap-backed indexes allocate on first insert.
    pub fn new() -> Self {
        Self {
            slots: S::new(),
            len: 0,
        }
    }

    /// Creates an index able to hold `entries` entries without growing.
    pub fn try_with_capacity(entries: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            slots: S::try_with_entries(entries)?,
            len: 0,
        })
    }

    /// Creates an index able to hold `entries` entries without growing.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot hold `entries` entries.
    pub fn with_capacity(entries: usize) -> Self {
        match Self::try_with_capacity(entries) {
            Ok(index) => index,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of entries before the index must grow.
    pub fn capacity(&self) -> usize {
        self.slots.max_entries()
    }

    /// Number of slots in the table.
    pub fn slot_count(&self) -> usize {
        self.slots.slots().len()
    }

    /// Returns the raw slot table.
    pub fn slots(&self) -> &[Slot] {
        self.slots.slots()
    }

    /// Iterates over `(hash, payload)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots
            .slots()
            .iter()
            .filter(|slot| !slot.is_empty())
            .map(|slot| (slot.hash, slot.payload))
    }

    /// Removes every entry, keeping the table allocated.
    pub fn clear(&mut self) {
        self.slots.slots_mut().fill(Slot::EMPTY);
        self.len = 0;
    }

    fn probe(&self, hash: u32, eq: impl Fn(u32) -> bool) -> Probe {
        let slots = self.slots.slots();
        if slots.is_empty() {
            return Probe::Full;
        }

        let mut index = home(hash, slots.len());
        for _ in 0..slots.len() {
            let slot = slots[index];
            if slot.is_empty() {
                return Probe::Vacant(index);
            }
            if slot.hash == hash && eq(slot.payload) {
                return Probe::Found(index);
            }
            index = next(index, slots.len());
        }

        Probe::Full
    }

    /// Returns the payload of the entry matching `hash` and `eq`.
    ///
    /// `eq` is only called for slots whose stored hash equals `hash`.
    pub fn get(&self, hash: u32, eq: impl Fn(u32) -> bool) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        match self.probe(hash, eq) {
            Probe::Found(index) => Some(self.slots.slots()[index].payload),
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Returns the payload of the matching entry, or `default`.
    pub fn get_or(&self, hash: u32, eq: impl Fn(u32) -> bool, default: u32) -> u32 {
        self.get(hash, eq).unwrap_or(default)
    }

    /// Inserts or updates an entry.
    ///
    /// Returns `Ok(true)` if a new entry was inserted and `Ok(false)` if the
    /// payload of an existing entry was overwritten. Heap-backed indexes grow
    /// as needed; inline indexes fail with [`CapacityError::Exhausted`] once
    /// full.
    ///
    /// # Panics
    ///
    /// Panics if `payload` is `u32::MAX`, which marks empty slots.
    pub fn try_set(
        &mut self,
        hash: u32,
        payload: u32,
        eq: impl Fn(u32) -> bool,
    ) -> Result<bool, CapacityError> {
        assert!(payload != EMPTY, "payload u32::MAX is reserved");

        match self.probe(hash, eq) {
            Probe::Found(index) => {
                self.slots.slots_mut()[index].payload = payload;
                return Ok(false);
            }
            Probe::Vacant(index) if self.len < self.slots.max_entries() => {
                self.slots.slots_mut()[index] = Slot { hash, payload };
                self.len += 1;
                return Ok(true);
            }
            Probe::Vacant(_) | Probe::Full => {}
        }

        self.try_insert_unique(hash, payload)?;
        Ok(true)
    }

    /// Inserts or updates an entry, returning `true` if it was inserted.
    ///
    /// # Panics
    ///
    /// Panics if an inline index is full and the entry is new.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dense_map::hash_index::HashIndex;
    ///
    /// let mut index: HashIndex = HashIndex::new();
    /// assert!(index.set(7, 1, |p| p == 1));
    /// assert!(!index.set(7, 1, |p| p == 1));
    /// assert_eq!(index.len(), 1);
    /// ```
    pub fn set(&mut self, hash: u32, payload: u32, eq: impl Fn(u32) -> bool) -> bool {
        match self.try_set(hash, payload, eq) {
            Ok(inserted) => inserted,
            Err(err) => panic!("{err}"),
        }
    }

    /// Inserts an entry the caller knows to be absent, skipping the equality
    /// checks.
    pub(crate) fn try_insert_unique(
        &mut self,
        hash: u32,
        payload: u32,
    ) -> Result<(), CapacityError> {
        debug_assert!(payload != EMPTY);

        if self.len >= self.slots.max_entries() {
            let doubled = self.slots.max_entries().saturating_mul(2);
            self.rehash(doubled.max(self.len + 1))
                .or_else(|_| self.rehash(self.len + 1))?;
        }

        let index = vacant_from(self.slots.slots(), hash).ok_or(CapacityError::Exhausted {
            capacity: self.slots.max_entries(),
        })?;
        self.slots.slots_mut()[index] = Slot { hash, payload };
        self.len += 1;
        Ok(())
    }

    /// Repoints the entry with `hash` and payload `from` to payload `to`.
    ///
    /// Returns `false` if no such entry exists.
    pub fn replace(&mut self, hash: u32, from: u32, to: u32) -> bool {
        debug_assert!(to != EMPTY);
        match self.probe(hash, |payload| payload == from) {
            Probe::Found(index) => {
                self.slots.slots_mut()[index].payload = to;
                true
            }
            Probe::Vacant(_) | Probe::Full => false,
        }
    }

    /// Removes the entry matching `hash` and `eq`, returning its payload.
    ///
    /// Entries further along the probe chain are shifted back into the hole,
    /// so no tombstone is left behind.
    pub fn remove(&mut self, hash: u32, eq: impl Fn(u32) -> bool) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        match self.probe(hash, eq) {
            Probe::Found(index) => {
                let payload = self.slots.slots()[index].payload;
                self.erase(index);
                Some(payload)
            }
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Empties the slot at `hole` and repairs the probe chain behind it.
    fn erase(&mut self, mut hole: usize) {
        let slots = self.slots.slots_mut();
        let slot_count = slots.len();
        slots[hole] = Slot::EMPTY;
        self.len -= 1;

        // Terminates: the hole itself is always empty.
        let mut index = hole;
        loop {
            index = next(index, slot_count);
            let slot = slots[index];
            if slot.is_empty() {
                break;
            }

            // An entry may fill the hole only if its home does not lie
            // between the hole and its current position.
            if !in_cyclic_range(home(slot.hash, slot_count), hole, index) {
                slots[hole] = slot;
                slots[index] = Slot::EMPTY;
                hole = index;
            }
        }
    }

    /// Decrements every payload strictly greater than `pivot`.
    ///
    /// Keys and slot positions are unchanged.
    pub fn decrement(&mut self, pivot: u32) {
        for slot in self.slots.slots_mut() {
            if !slot.is_empty() && slot.payload > pivot {
                slot.payload -= 1;
            }
        }
    }

    /// Reserves room for at least `additional` more entries.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), CapacityError> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(CapacityError::Overflow)?;
        if required > self.slots.max_entries() {
            self.rehash(required)?;
        }
        Ok(())
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// # Panics
    ///
    /// Panics if the storage cannot hold that many entries.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            panic!("{err}");
        }
    }

    /// Moves every entry into fresh storage sized for `entries`.
    #[cold]
    fn rehash(&mut self, entries: usize) -> Result<(), CapacityError> {
        let mut grown = S::try_with_entries(entries)?;
        let capacity = grown.max_entries();
        let new_slots = grown.slots_mut();
        for slot in self.slots.slots().iter().filter(|slot| !slot.is_empty()) {
            let index = vacant_from(new_slots, slot.hash)
                .ok_or(CapacityError::Exhausted { capacity })?;
            new_slots[index] = *slot;
        }

        self.slots = grown;
        Ok(())
    }

    /// Computes a histogram of probe lengths for the current table state.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        let slots = self.slots.slots();
        let mut bins = alloc::vec::Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            if slot.is_empty() {
                continue;
            }
            let distance = (index + slots.len() - home(slot.hash, slots.len())) % slots.len();
            if bins.len() <= distance {
                bins.resize(distance + 1, 0);
            }
            bins[distance] += 1;
        }

        ProbeHistogram { bins }
    }

    /// Returns detailed utilization statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let total_slots = self.slot_count();
        let capacity = self.capacity();
        DebugStats {
            populated: self.len,
            capacity,
            total_slots,
            load_factor: if capacity == 0 {
                0.0
            } else {
                self.len as f64 / capacity as f64
            },
            slot_utilization: if total_slots == 0 {
                0.0
            } else {
                self.len as f64 / total_slots as f64
            },
            max_probe_length: self.probe_histogram().max_probe_length(),
            index_bytes: total_slots * core::mem::size_of::<Slot>(),
            dense_bytes: 0,
        }
    }

    /// Checks the probe-chain invariant for every stored entry.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let slots = self.slots.slots();
        let occupied = slots.iter().filter(|slot| !slot.is_empty()).count();
        assert_eq!(occupied, self.len, "{self:?}");

        for (index, slot) in slots.iter().enumerate() {
            if slot.is_empty() {
                continue;
            }
            let mut probe = home(slot.hash, slots.len());
            while probe != index {
                assert!(
                    !slots[probe].is_empty(),
                    "entry at {index} unreachable from home: {self:?}"
                );
                probe = next(probe, slots.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::collections::BTreeSet;
    use alloc::vec::Vec;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    // Identity-hashed keys are fully described by their hash, so the
    // predicate can accept any payload.
    fn set_key<S: SlotStorage>(index: &mut HashIndex<S>, key: u32, value: u32) -> bool {
        index.set(key, value, |_| true)
    }

    fn get_key<S: SlotStorage>(index: &HashIndex<S>, key: u32) -> Option<u32> {
        index.get(key, |_| true)
    }

    fn remove_key<S: SlotStorage>(index: &mut HashIndex<S>, key: u32) -> Option<u32> {
        index.remove(key, |_| true)
    }

    fn slot_keys<S: SlotStorage>(index: &HashIndex<S>) -> Vec<Option<u32>> {
        index.slots().iter().map(|slot| slot.hash()).collect()
    }

    #[test]
    fn cyclic_range_membership() {
        assert!(in_cyclic_range(2, 1, 3));
        assert!(in_cyclic_range(3, 1, 3));
        assert!(!in_cyclic_range(1, 1, 3));
        assert!(!in_cyclic_range(4, 1, 3));

        assert!(in_cyclic_range(4, 3, 1));
        assert!(in_cyclic_range(0, 3, 1));
        assert!(in_cyclic_range(1, 3, 1));
        assert!(!in_cyclic_range(3, 3, 1));
        assert!(!in_cyclic_range(2, 3, 1));
    }

    #[test]
    fn remove_wraps_shifted_entries_3_4_8_9() {
        let mut index: HashIndex<InlineSlots<5>> = HashIndex::new();
        for key in [3, 4, 8, 9] {
            assert!(set_key(&mut index, key, key + 100));
        }
        assert_eq!(
            slot_keys(&index),
            vec![Some(8), Some(9), None, Some(3), Some(4)]
        );

        assert_eq!(remove_key(&mut index, 3), Some(103));
        index.assert_consistent();
        assert_eq!(
            slot_keys(&index),
            vec![Some(9), None, None, Some(8), Some(4)]
        );
        assert_eq!(get_key(&index, 3), None);
        assert_eq!(get_key(&index, 4), Some(104));
        assert_eq!(get_key(&index, 8), Some(108));
        assert_eq!(get_key(&index, 9), Some(109));
    }

    #[test]
    fn remove_wraps_shifted_entries_3_4_9_8() {
        let mut index: HashIndex<InlineSlots<5>> = HashIndex::new();
        for key in [3, 4, 9, 8] {
            assert!(set_key(&mut index, key, key + 100));
        }
        assert_eq!(
            slot_keys(&index),
            vec![Some(9), Some(8), None, Some(3), Some(4)]
        );

        assert_eq!(remove_key(&mut index, 3), Some(103));
        index.assert_consistent();
        assert_eq!(
            slot_keys(&index),
            vec![Some(9), None, None, Some(8), Some(4)]
        );
        assert_eq!(get_key(&index, 3), None);
        assert_eq!(get_key(&index, 4), Some(104));
        assert_eq!(get_key(&index, 8), Some(108));
        assert_eq!(get_key(&index, 9), Some(109));
    }

    #[test]
    fn remove_wraps_shifted_entries_3_4_0_9() {
        let mut index: HashIndex<InlineSlots<5>> = HashIndex::new();
        for key in [3, 4, 0, 9] {
            assert!(set_key(&mut index, key, key + 100));
        }
        assert_eq!(
            slot_keys(&index),
            vec![Some(0), Some(9), None, Some(3), Some(4)]
        );

        assert_eq!(remove_key(&mut index, 3), Some(103));
        index.assert_consistent();
        assert_eq!(
            slot_keys(&index),
            vec![Some(0), Some(9), None, None, Some(4)]
        );
        assert_eq!(get_key(&index, 3), None);
        assert_eq!(get_key(&index, 0), Some(100));
        assert_eq!(get_key(&index, 4), Some(104));
        assert_eq!(get_key(&index, 9), Some(109));
    }

    #[test]
    fn set_reports_insert_then_update() {
        let mut index: HashIndex = HashIndex::new();
        assert_eq!(index.slot_count(), 0);
        assert!(set_key(&mut index, 42, 1));
        assert!(!set_key(&mut index, 42, 2));
        assert_eq!(index.len(), 1);
        assert_eq!(get_key(&index, 42), Some(2));
        assert_eq!(index.get_or(43, |_| true, 7), 7);
    }

    #[test]
    fn full_inline_table_rejects_new_keys() {
        let mut index: HashIndex<InlineSlots<4>> = HashIndex::new();
        for key in 0..4 {
            assert!(set_key(&mut index, key * 4, key));
        }
        assert_eq!(index.len(), 4);
        assert_eq!(
            index.try_set(99, 9, |_| true),
            Err(CapacityError::Exhausted { capacity: 4 })
        );

        // Updates still succeed and misses still terminate on a full table.
        assert_eq!(index.try_set(8, 20, |_| true), Ok(false));
        assert_eq!(get_key(&index, 8), Some(20));
        assert_eq!(get_key(&index, 5), None);
        assert_eq!(remove_key(&mut index, 5), None);
        index.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn set_on_full_inline_table_panics() {
        let mut index: HashIndex<InlineSlots<2>> = HashIndex::new();
        set_key(&mut index, 0, 0);
        set_key(&mut index, 1, 1);
        set_key(&mut index, 2, 2);
    }

    #[test]
    fn zero_slot_inline_table() {
        let mut index: HashIndex<InlineSlots<0>> = HashIndex::new();
        assert_eq!(get_key(&index, 1), None);
        assert_eq!(remove_key(&mut index, 1), None);
        assert_eq!(
            index.try_set(1, 1, |_| true),
            Err(CapacityError::Exhausted { capacity: 0 })
        );
    }

    #[test]
    fn colliding_hashes_stay_distinct() {
        let mut index: HashIndex = HashIndex::new();
        for key in 0..64u32 {
            assert!(index.set(key % 2, key, |p| p == key));
        }
        index.assert_consistent();
        for key in 0..64u32 {
            assert_eq!(index.get(key % 2, |p| p == key), Some(key));
        }

        for key in (1..64u32).step_by(2) {
            assert_eq!(index.remove(key % 2, |p| p == key), Some(key));
            index.assert_consistent();
        }
        assert_eq!(index.len(), 32);
        for key in 0..64u32 {
            let expected = (key % 2 == 0).then_some(key);
            assert_eq!(index.get(key % 2, |p| p == key), expected);
        }
    }

    #[test]
    fn decrement_adjusts_payloads_above_pivot() {
        let mut index: HashIndex = HashIndex::new();
        for key in 0..10u32 {
            set_key(&mut index, key, key);
        }
        let before = slot_keys(&index);

        index.decrement(4);
        assert_eq!(slot_keys(&index), before);
        for key in 0..10u32 {
            let expected = if key > 4 { key - 1 } else { key };
            assert_eq!(get_key(&index, key), Some(expected));
        }
    }

    #[test]
    fn replace_repoints_single_payload() {
        let mut index: HashIndex = HashIndex::new();
        index.set(5, 1, |p| p == 1);
        index.set(5, 2, |p| p == 2);

        assert!(index.replace(5, 2, 7));
        assert!(!index.replace(5, 2, 8));
        assert_eq!(index.get(5, |p| p == 7), Some(7));
        assert_eq!(index.get(5, |p| p == 1), Some(1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn reserve_grows_and_preserves_entries() {
        let mut index: HashIndex = HashIndex::new();
        for key in 0..20u32 {
            set_key(&mut index, key.wrapping_mul(2654435761), key);
        }
        let capacity = index.capacity();

        index.reserve(1000);
        assert!(index.capacity() >= 1020);
        assert!(index.capacity() >= capacity);
        assert!(index.slot_count().is_power_of_two());
        index.assert_consistent();
        for key in 0..20u32 {
            assert_eq!(get_key(&index, key.wrapping_mul(2654435761)), Some(key));
        }

        index.reserve(0);
        assert!(index.capacity() >= 1020);
    }

    #[test]
    fn growth_respects_load_factor() {
        let mut index: HashIndex = HashIndex::new();
        for key in 0..2_000u32 {
            set_key(&mut index, key, key);
            let stats = index.debug_stats();
            assert!(stats.populated <= stats.capacity);
            assert!(stats.capacity < stats.total_slots);
        }
        index.assert_consistent();
    }

    #[test]
    fn inline_reserve_beyond_capacity_fails() {
        let mut index: HashIndex<InlineSlots<8>> = HashIndex::new();
        assert_eq!(index.try_reserve(8), Ok(()));
        set_key(&mut index, 1, 1);
        assert_eq!(
            index.try_reserve(8),
            Err(CapacityError::Exhausted { capacity: 8 })
        );
    }

    #[test]
    fn clear_keeps_table() {
        let mut index: HashIndex = HashIndex::with_capacity(100);
        let slot_count = index.slot_count();
        for key in 0..50u32 {
            set_key(&mut index, key, key);
        }
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.slot_count(), slot_count);
        assert_eq!(get_key(&index, 3), None);
        assert_eq!(index.iter().count(), 0);
    }

    #[test]
    fn churn_near_wrap_boundary_matches_model() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut index: HashIndex<InlineSlots<16>> = HashIndex::new();
        let mut model = BTreeSet::new();

        for _ in 0..20_000 {
            // Homes crowd the last few slots so chains keep wrapping.
            let key: u32 = rng.random_range(0..40);
            let hash = 12 + key % 6;
            if rng.random_bool(0.5) && model.len() < 16 {
                let inserted = index.set(hash, key, |p| p == key);
                assert_eq!(inserted, model.insert(key));
            } else {
                let removed = index.remove(hash, |p| p == key);
                assert_eq!(removed.is_some(), model.remove(&key));
            }
            index.assert_consistent();
        }

        for key in 0..40u32 {
            let found = index.get(12 + key % 6, |p| p == key);
            assert_eq!(found.is_some(), model.contains(&key));
        }
    }

    #[test]
    fn randomized_churn_matches_model() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut index: HashIndex = HashIndex::new();
        let mut model = hashbrown::HashMap::new();

        for round in 0..50_000u32 {
            let key: u32 = rng.random_range(0..2_000);
            let hash = key.wrapping_mul(0x9e37_79b9) >> 20;
            match rng.random_range(0..3) {
                0 | 1 => {
                    let inserted = index.set(hash, key, |p| p == key);
                    assert_eq!(inserted, model.insert(key, round).is_none());
                }
                _ => {
                    let removed = index.remove(hash, |p| p == key);
                    assert_eq!(removed, model.remove(&key).map(|_| key));
                }
            }
        }

        index.assert_consistent();
        assert_eq!(index.len(), model.len());
        for key in model.keys() {
            let hash = key.wrapping_mul(0x9e37_79b9) >> 20;
            assert_eq!(index.get(hash, |p| p == *key), Some(*key));
        }
    }

    #[test]
    fn probe_histogram_counts_every_entry() {
        let mut index: HashIndex<InlineSlots<8>> = HashIndex::new();
        for key in 0..5u32 {
            index.set(0, key, |p| p == key);
        }

        let histogram = index.probe_histogram();
        assert_eq!(histogram.bins, vec![1, 1, 1, 1, 1]);
        assert_eq!(histogram.max_probe_length(), 4);
    }

    #[test]
    fn debug_lists_slots() {
        let mut index: HashIndex<InlineSlots<3>> = HashIndex::new();
        set_key(&mut index, 1, 9);
        let rendered = alloc::format!("{index:?}");
        assert!(rendered.contains("00000001->9"), "{rendered}");
        assert!(rendered.contains(".."), "{rendered}");
    }
}
