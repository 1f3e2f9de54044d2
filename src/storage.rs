//! Dense key/value array storage.
//!
//! A [`DenseMap`] keeps its entries in two index-aligned arrays. The arrays
//! live either inline ([`InlineStorage`], a fixed `N` entries, no allocation)
//! or in a single heap block ([`HeapStorage`], grown by reallocation). Both
//! expose the same uninitialized slices; the map tracks how many leading
//! elements are live and is responsible for dropping them.
//!
//! [`DenseMap`]: crate::dense_map::DenseMap

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::hash_index::CapacityError;
use crate::hash_index::HeapSlots;
use crate::hash_index::InlineSlots;
use crate::hash_index::MAX_ENTRIES;
use crate::hash_index::SlotStorage;

/// Storage for the dense key and value arrays of a map.
///
/// # Safety
///
/// - `keys`, `values` and both halves of `parts_mut` must have exactly
///   `capacity()` elements and must not overlap.
/// - The contents of the arrays may only change through the slices handed
///   out; `try_grow(len, ..)` must preserve the first `len` elements of both
///   arrays bit-for-bit.
/// - Neither the storage nor its `Drop` may read or drop the elements.
pub unsafe trait Storage<K, V>: Sized {
    /// Slot storage of the index that accompanies these arrays.
    type Slots: SlotStorage;

    /// Creates the initial storage. Heap storage starts without capacity.
    fn new() -> Self;

    /// Creates storage holding at least `capacity` entries.
    fn try_with_capacity(capacity: usize) -> Result<Self, CapacityError>;

    /// Number of entries the arrays can hold.
    fn capacity(&self) -> usize;

    /// The key array.
    fn keys(&self) -> &[MaybeUninit<K>];

    /// The value array.
    fn values(&self) -> &[MaybeUninit<V>];

    /// Both arrays, mutably.
    fn parts_mut(&mut self) -> (&mut [MaybeUninit<K>], &mut [MaybeUninit<V>]);

    /// Grows to hold at least `capacity` entries, keeping the first `len`.
    fn try_grow(&mut self, len: usize, capacity: usize) -> Result<(), CapacityError>;

    /// Bytes occupied by the arrays.
    fn allocated_bytes(&self) -> usize;
}

/// Fixed storage for `N` entries inside the map value itself.
pub struct InlineStorage<K, V, const N: usize> {
    keys: [MaybeUninit<K>; N],
    values: [MaybeUninit<V>; N],
}

// SAFETY: Both arrays have `N` elements, are separate fields, and are only
// touched through the returned slices. Growing never moves anything.
unsafe impl<K, V, const N: usize> Storage<K, V> for InlineStorage<K, V, N> {
    type Slots = InlineSlots<N>;

    fn new() -> Self {
        Self {
            keys: [const { MaybeUninit::uninit() }; N],
            values: [const { MaybeUninit::uninit() }; N],
        }
    }

    fn try_with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        if capacity > N.min(MAX_ENTRIES) {
            return Err(CapacityError::Exhausted { capacity: N });
        }
        Ok(Self::new())
    }

    fn capacity(&self) -> usize {
        N.min(MAX_ENTRIES)
    }

    fn keys(&self) -> &[MaybeUninit<K>] {
        &self.keys
    }

    fn values(&self) -> &[MaybeUninit<V>] {
        &self.values
    }

    fn parts_mut(&mut self) -> (&mut [MaybeUninit<K>], &mut [MaybeUninit<V>]) {
        (&mut self.keys, &mut self.values)
    }

    fn try_grow(&mut self, _len: usize, capacity: usize) -> Result<(), CapacityError> {
        if capacity > N.min(MAX_ENTRIES) {
            return Err(CapacityError::Exhausted { capacity: N });
        }
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        core::mem::size_of::<Self>()
    }
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    values_offset: usize,
}

impl DataLayout {
    fn new<K, V>(capacity: usize) -> Result<Self, CapacityError> {
        let keys_layout = Layout::array::<K>(capacity).map_err(|_| CapacityError::Overflow)?;
        let values_layout = Layout::array::<V>(capacity).map_err(|_| CapacityError::Overflow)?;
        let (layout, values_offset) = keys_layout
            .extend(values_layout)
            .map_err(|_| CapacityError::Overflow)?;

        Ok(DataLayout {
            layout: layout.pad_to_align(),
            values_offset,
        })
    }

    fn empty<K, V>() -> Self {
        DataLayout {
            layout: Layout::new::<[(K, V); 0]>(),
            values_offset: 0,
        }
    }
}

fn allocate(layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        // SAFETY: Alignments are never zero, so the pointer is non-null. It
        // is suitably aligned for every array of the layout and never read.
        return unsafe { NonNull::new_unchecked(core::ptr::without_provenance_mut(layout.align())) };
    }

    // SAFETY: We have validated that the layout size is non-zero.
    let raw_alloc = unsafe { alloc::alloc::alloc(layout) };
    match NonNull::new(raw_alloc) {
        Some(alloc) => alloc,
        None => handle_alloc_error(layout),
    }
}

fn deallocate(alloc: NonNull<u8>, layout: Layout) {
    if layout.size() != 0 {
        // SAFETY: Non-zero layouts are only ever paired with a pointer
        // returned by `allocate` for that same layout.
        unsafe { alloc::alloc::dealloc(alloc.as_ptr(), layout) };
    }
}

/// Growable storage holding both arrays in a single heap allocation.
///
/// The block is laid out as `[K; capacity]` followed by `[V; capacity]`.
/// Growing allocates a new block, moves the live prefix of both arrays and
/// frees the old block.
pub struct HeapStorage<K, V> {
    alloc: NonNull<u8>,
    layout: DataLayout,
    capacity: usize,
    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The storage exclusively owns its allocation; sending or sharing it
// is exactly as safe as sending or sharing the keys and values inside.
unsafe impl<K: Send, V: Send> Send for HeapStorage<K, V> {}
// SAFETY: See above; shared access only hands out shared slices.
unsafe impl<K: Sync, V: Sync> Sync for HeapStorage<K, V> {}

impl<K, V> Drop for HeapStorage<K, V> {
    fn drop(&mut self) {
        deallocate(self.alloc, self.layout.layout);
    }
}

impl<K, V> HeapStorage<K, V> {
    fn keys_ptr(&self) -> *mut MaybeUninit<K> {
        self.alloc.as_ptr().cast()
    }

    fn values_ptr(&self) -> *mut MaybeUninit<V> {
        // SAFETY: `values_offset` lies within (or one past the end of) the
        // allocation described by `layout`.
        unsafe { self.alloc.as_ptr().add(self.layout.values_offset).cast() }
    }
}

// SAFETY: The key array occupies `[0, capacity * size_of::<K>())` and the
// value array starts at `values_offset`, past the end of the keys. Growth
// copies the first `len` elements of each array before freeing the old block.
unsafe impl<K, V> Storage<K, V> for HeapStorage<K, V> {
    type Slots = HeapSlots;

    fn new() -> Self {
        let layout = DataLayout::empty::<K, V>();
        Self {
            alloc: allocate(layout.layout),
            layout,
            capacity: 0,
            _phantom: PhantomData,
        }
    }

    fn try_with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        let mut storage = Self::new();
        storage.try_grow(0, capacity)?;
        Ok(storage)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn keys(&self) -> &[MaybeUninit<K>] {
        // SAFETY: The allocation holds `capacity` keys at its start.
        unsafe { core::slice::from_raw_parts(self.keys_ptr(), self.capacity) }
    }

    fn values(&self) -> &[MaybeUninit<V>] {
        // SAFETY: The allocation holds `capacity` values at `values_offset`.
        unsafe { core::slice::from_raw_parts(self.values_ptr(), self.capacity) }
    }

    fn parts_mut(&mut self) -> (&mut [MaybeUninit<K>], &mut [MaybeUninit<V>]) {
        // SAFETY: The two arrays are disjoint regions of the allocation and
        // `&mut self` guarantees exclusive access to both.
        unsafe {
            (
                core::slice::from_raw_parts_mut(self.keys_ptr(), self.capacity),
                core::slice::from_raw_parts_mut(self.values_ptr(), self.capacity),
            )
        }
    }

    fn try_grow(&mut self, len: usize, capacity: usize) -> Result<(), CapacityError> {
        assert!(len <= self.capacity, "live prefix exceeds capacity");
        if capacity <= self.capacity {
            return Ok(());
        }
        if capacity > MAX_ENTRIES {
            return Err(CapacityError::Overflow);
        }

        let new_layout = DataLayout::new::<K, V>(capacity)?;
        let new_alloc = allocate(new_layout.layout);

        // SAFETY: Both blocks hold at least `len` elements per array, the
        // regions belong to different allocations, and the moved-from copies
        // are never read again once the old block is freed.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.keys_ptr(),
                new_alloc.as_ptr().cast::<MaybeUninit<K>>(),
                len,
            );
            core::ptr::copy_nonoverlapping(
                self.values_ptr(),
                new_alloc
                    .as_ptr()
                    .add(new_layout.values_offset)
                    .cast::<MaybeUninit<V>>(),
                len,
            );
        }

        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        deallocate(old_alloc, old_layout.layout);
        self.capacity = capacity;
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        self.layout.layout.size()
    }
}
