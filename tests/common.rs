#![allow(dead_code)]

use std::hash::{BuildHasherDefault, Hasher};

use strata::HashMap;

// Run the test on different configurations of a `HashMap`.
pub fn with_map<K, V>(mut test: impl FnMut(&dyn Fn() -> HashMap<K, V>))
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // Unsized: every growth happens under the test's own operations.
    test(&(|| HashMap::new().unwrap()));

    // Pre-sized past several growth boundaries to exercise lookups across
    // layers allocated up front.
    test(&(|| HashMap::with_capacity(10_000).unwrap()));
}

// The number of threads for concurrent tests.
pub fn threads() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(4)
        .clamp(4, 8)
}

// A hasher that sends every key to the same slot, forcing the overflow
// path.
#[derive(Default)]
pub struct ConstantHasher;

impl Hasher for ConstantHasher {
    fn write(&mut self, _bytes: &[u8]) {}

    fn finish(&self) -> u64 {
        0
    }
}

pub type ConstantState = BuildHasherDefault<ConstantHasher>;
