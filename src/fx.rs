//! Fast hash containers, plus the insertion-ordered variants used wherever
//! iteration order is observable (CFG edge sets, block maps, liveness sets).

pub use rustc_hash::{FxHashMap, FxHashSet};

use core::hash::BuildHasherDefault;
use rustc_hash::FxHasher;

/// Insertion-ordered map with the same fast hasher.
pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Insertion-ordered set with the same fast hasher.
pub type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;
