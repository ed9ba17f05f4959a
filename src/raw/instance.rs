// The process-wide instance pool.
//
// Managers cannot live inside the map: per-thread counters are owned by
// thread-local storage and must be able to deregister when their thread
// exits, which can happen after the map is gone. Instead the process holds
// a fixed pool of managers; a map leases an index for its lifetime, and a
// thread lazily binds one counter to each index it touches.

use std::cell::{RefCell, UnsafeCell};

use super::count::{LocalCounter, Manager, SpinLock};
use super::utils::CachePadded;
use crate::map::Error;

/// The maximum number of concurrently live map instances in one process.
pub const MAX_INSTANCES: usize = 1024;

static MANAGERS: [Manager; MAX_INSTANCES] = [const { Manager::new() }; MAX_INSTANCES];

// The free instance indices, primed lazily with `0..MAX_INSTANCES`.
static FREE: FreeList = FreeList {
    lock: SpinLock::new(),
    indices: UnsafeCell::new(None),
};

struct FreeList {
    lock: SpinLock,
    /// Guarded by `lock`.
    indices: UnsafeCell<Option<Vec<usize>>>,
}

// Safety: `indices` is only accessed under `lock`.
unsafe impl Sync for FreeList {}

thread_local! {
    // This thread's counters, one slot per instance index, created on the
    // first touch of that index and dropped (deregistering themselves) at
    // thread exit.
    static COUNTERS: RefCell<Vec<Option<Box<CachePadded<LocalCounter>>>>> =
        const { RefCell::new(Vec::new()) };
}

/// Returns the manager leased to the given instance index.
#[inline]
pub fn manager(index: usize) -> &'static Manager {
    &MANAGERS[index]
}

/// Leases a free instance index.
pub fn acquire() -> Result<usize, Error> {
    FREE.lock.lock();

    let indices = unsafe { &mut *FREE.indices.get() };
    let index = indices
        .get_or_insert_with(|| (0..MAX_INSTANCES).rev().collect())
        .pop();

    FREE.lock.unlock();
    index.ok_or(Error::InstancePoolExhausted)
}

/// Returns an instance index to the pool, resetting its manager for the
/// next lease.
pub fn release(index: usize) {
    MANAGERS[index].reset();

    FREE.lock.lock();
    if let Some(indices) = unsafe { &mut *FREE.indices.get() } {
        indices.push(index);
    }
    FREE.lock.unlock();
}

/// Runs `f` with this thread's counter for the given instance index,
/// creating and registering the counter on the first touch.
#[inline]
pub fn with_counter<R>(index: usize, f: impl FnOnce(&LocalCounter) -> R) -> R {
    COUNTERS.with(|counters| {
        let mut counters = counters.borrow_mut();
        if counters.is_empty() {
            counters.resize_with(MAX_INSTANCES, || None);
        }

        let counter = counters[index].get_or_insert_with(|| LocalCounter::register(manager(index)));
        f(counter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_indices() {
        let first = acquire().unwrap();
        release(first);

        // Freed most recently, leased next.
        let second = acquire().unwrap();
        assert_eq!(first, second);
        release(second);
    }
}
