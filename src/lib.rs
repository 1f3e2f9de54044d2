#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod dense_map;

/// A tombstone-free linear-probing index from hashes to small integer
/// payloads.
///
/// This is the lookup structure behind [`DenseMap`]. It is usable on its own
/// wherever a compact `hash -> u32` table is needed.
pub mod hash_index;

pub mod storage;

pub use dense_map::DenseMap;
pub use dense_map::Mode;
pub use hash_index::CapacityError;
pub use hash_index::HashIndex;
use storage::HeapStorage;
use storage::InlineStorage;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hasher builder used when none is given.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// Hasher builder used when none is given.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(feature = "foldhash", feature = "std"))] {
        /// A [`DenseMap`] backed by a single growable heap allocation.
        pub type Map<K, V, S = DefaultHashBuilder> = DenseMap<K, V, S, HeapStorage<K, V>>;

        /// A [`DenseMap`] holding at most `N` entries inline, without
        /// allocating.
        pub type FixedMap<K, V, const N: usize, S = DefaultHashBuilder> =
            DenseMap<K, V, S, InlineStorage<K, V, N>>;
    } else {
        /// A [`DenseMap`] backed by a single growable heap allocation.
        pub type Map<K, V, S> = DenseMap<K, V, S, HeapStorage<K, V>>;

        /// A [`DenseMap`] holding at most `N` entries inline, without
        /// allocating.
        pub type FixedMap<K, V, const N: usize, S> = DenseMap<K, V, S, InlineStorage<K, V, N>>;
    }
}
