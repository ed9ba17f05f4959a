//! A concurrent hash map that grows by layering instead of rehashing.
//!
//! The table is a stack of append-only layers: growing allocates the next
//! layer and never moves an existing entry, so slot addresses are stable for
//! the life of the map. Each slot carries its own word-sized read-write spin
//! lock, and the map's size is tracked by per-thread counters whose sum also
//! drives growth.
//!
//! See [`HashMap`] for usage.

mod map;
mod raw;

#[cfg(feature = "serde")]
mod serde_impls;

pub use map::{Error, HashMap, HashMapBuilder};
pub use raw::MAX_INSTANCES;
