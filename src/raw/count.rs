// The sharded size estimator.
//
// Tracking the length of the map with a single atomic would make every
// insertion and deletion contend on one cache line, so each thread keeps a
// signed counter per map instance and a manager periodically repartitions
// how far the counters may drift before they must report in. The manager
// owns the growth decision: whenever a counter trips its threshold, the
// manager sums everything, asks the growth callback for the next target
// total, and spreads the remaining slack over the registered counters.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::thread;

use parking_lot_core::SpinWait;

use super::probe;
use super::utils::CachePadded;
use crate::map::Error;

/// The error tolerated on the tracked size, relative to the growth target.
const MAX_ERROR: f64 = 1e-5;

/// The growth policy: maps the current global count to the next target
/// total, growing the table as a side effect when the count has passed the
/// current capacity.
pub type GrowthFn = Box<dyn Fn(usize) -> Result<usize, Error> + Send + Sync>;

/// A raw spin lock.
///
/// Beyond the usual acquire and release, waiters can pause until the lock is
/// free without taking it, which is what the threshold and quiesce
/// protocols below are built on.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> SpinLock {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        let mut spin = SpinWait::new();
        while !self.try_lock() {
            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Spins until the lock is free, without acquiring it.
    pub fn wait(&self) {
        let mut spin = SpinWait::new();
        while self.is_locked() {
            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// One thread's share of a manager's global count.
///
/// Bound to a single [`Manager`] for its whole life: registered when
/// created, deregistered (donating its final value to the manager's
/// dead-sum) when dropped.
pub struct LocalCounter {
    value: AtomicIsize,
    threshold: AtomicIsize,
    manager: &'static Manager,
}

impl LocalCounter {
    /// Creates a counter bound to `manager` and registers it.
    ///
    /// The counter is padded out to its own cache line so that neighboring
    /// heap allocations do not share it.
    pub fn register(manager: &'static Manager) -> Box<CachePadded<LocalCounter>> {
        let counter = Box::new(CachePadded::new(LocalCounter {
            value: AtomicIsize::new(0),
            threshold: AtomicIsize::new(0),
            manager,
        }));

        manager.register(&counter);
        counter
    }

    /// Records one insertion.
    ///
    /// Runs a manager update if the new value reached this counter's
    /// threshold; a growth failure in that update is the only error.
    #[inline]
    pub fn increment(&self) -> Result<(), Error> {
        let value = self.value.fetch_add(1, Ordering::Release) + 1;

        let result = if value >= self.threshold.load(Ordering::Acquire) {
            self.manager.update()
        } else {
            Ok(())
        };

        // An exact read may be in flight; the operation is not complete
        // until it is.
        self.manager.wait_for_global();
        result
    }

    /// Records one deletion. Never fails.
    #[inline]
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Release);
        self.manager.wait_for_global();
    }

    #[inline]
    fn get(&self) -> isize {
        self.value.load(Ordering::Acquire)
    }

    /// Replaces the threshold with the current value plus `margin`.
    #[inline]
    fn adjust_threshold(&self, margin: isize) {
        self.threshold.store(self.get() + margin, Ordering::Release);
    }
}

impl Drop for LocalCounter {
    fn drop(&mut self) {
        self.manager.deregister(self);
    }
}

/// The registry of one map instance's per-thread counters.
pub struct Manager {
    /// Pointers to the live counters. Guarded by `lock`.
    registry: UnsafeCell<Vec<NonNull<LocalCounter>>>,

    /// The values donated by already-dropped counters. Guarded by `lock`.
    dead_sum: UnsafeCell<isize>,

    /// The installed growth policy, if any. Guarded by `lock`.
    callback: UnsafeCell<Option<GrowthFn>>,

    /// Guards the three fields above.
    lock: SpinLock,

    /// Held to freeze increments and decrements mid-flight, making the
    /// summed count exact. See [`Manager::global_value`].
    quiesce: SpinLock,
}

// Safety: all interior state is guarded by `lock` (and registered counters
// are atomics); the quiesce protocol adds no unguarded state.
unsafe impl Sync for Manager {}

impl Manager {
    pub const fn new() -> Manager {
        Manager {
            registry: UnsafeCell::new(Vec::new()),
            dead_sum: UnsafeCell::new(0),
            callback: UnsafeCell::new(None),
            lock: SpinLock::new(),
            quiesce: SpinLock::new(),
        }
    }

    /// Installs the growth policy.
    pub fn set_callback(&self, callback: GrowthFn) {
        self.lock.lock();
        unsafe { *self.callback.get() = Some(callback) };
        self.lock.unlock();
    }

    /// Puts the manager back into its initial state for the next map
    /// instance occupying this slot.
    ///
    /// Surviving registered counters belong to threads that touched the
    /// previous occupant; their values and thresholds are zeroed so the
    /// next instance starts from an exact zero count.
    pub fn reset(&self) {
        self.quiesce.lock();
        self.lock.lock();

        unsafe {
            for counter in (*self.registry.get()).iter() {
                let counter = counter.as_ref();
                counter.value.store(0, Ordering::Release);
                counter.threshold.store(0, Ordering::Release);
            }

            *self.dead_sum.get() = 0;
            *self.callback.get() = None;
        }

        self.lock.unlock();
        self.quiesce.unlock();
    }

    /// Runs a threshold update unless one is already in flight.
    ///
    /// If another thread holds the registry lock it is already
    /// repartitioning thresholds, so rather than queueing up a redundant
    /// update this thread just pauses until the new thresholds are in
    /// place.
    pub fn update(&self) -> Result<(), Error> {
        if !self.lock.try_lock() {
            self.lock.wait();
            return Ok(());
        }

        let result = self.update_locked();
        self.lock.unlock();
        result
    }

    /// Returns the exact global count.
    ///
    /// Taking the quiesce lock parks every increment and decrement at its
    /// completion point, so the sum taken under both locks is exact at that
    /// instant.
    pub fn global_value(&self) -> usize {
        self.quiesce.lock();
        self.lock.lock();

        let sum = self.sum_locked();

        self.lock.unlock();
        self.quiesce.unlock();
        sum
    }

    /// Spins while an exact read is in flight.
    #[inline]
    pub fn wait_for_global(&self) {
        if self.quiesce.is_locked() {
            self.quiesce.wait();
        }
    }

    fn register(&self, counter: &LocalCounter) {
        self.lock.lock();
        unsafe { (*self.registry.get()).push(NonNull::from(counter)) };

        // More counters mean tighter per-counter margins, so repartition
        // now. A growth failure here is deliberately dropped: the new
        // counter's threshold is still zero, so the very next increment
        // re-runs the update and surfaces the error on the mutating call.
        let _ = self.update_locked();
        self.lock.unlock();
    }

    fn deregister(&self, counter: &LocalCounter) {
        self.lock.lock();

        unsafe {
            let registry = &mut *self.registry.get();
            if let Some(i) = registry
                .iter()
                .position(|p| ptr::eq(p.as_ptr(), counter))
            {
                *self.dead_sum.get() += counter.get();
                registry.swap_remove(i);
            }
        }

        self.lock.unlock();
    }

    // Sums the live counters and the dead-sum. Caller holds `lock`.
    fn sum_locked(&self) -> usize {
        let registry = unsafe { &*self.registry.get() };

        let sum = registry
            .iter()
            .map(|counter| unsafe { counter.as_ref() }.get())
            .sum::<isize>()
            + unsafe { *self.dead_sum.get() };

        // Depending on the order increments and decrements land, the sum
        // can transiently dip negative; report empty.
        sum.try_into().unwrap_or(0)
    }

    // Repartitions the counter thresholds. Caller holds `lock`.
    fn update_locked(&self) -> Result<(), Error> {
        let global = self.sum_locked();

        let target = match unsafe { &*self.callback.get() } {
            Some(callback) => callback(global)?,
            None => probe::prime(0),
        };

        let registry = unsafe { &*self.registry.get() };
        if registry.is_empty() {
            return Ok(());
        }

        // The slack until the target, spread over the counters; the floor
        // keeps updates from converging onto every single increment once
        // the count closes in on the target.
        let slack = (target as isize - global as isize)
            .max((target as f64 * MAX_ERROR).ceil() as isize);
        let margin = slack / registry.len() as isize;

        for counter in registry {
            unsafe { counter.as_ref() }.adjust_threshold(margin);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MANAGER: Manager = Manager::new();

    #[test]
    fn counts_exactly() {
        let counter = LocalCounter::register(&MANAGER);

        for _ in 0..100 {
            counter.increment().unwrap();
        }
        for _ in 0..25 {
            counter.decrement();
        }

        assert_eq!(MANAGER.global_value(), 75);

        // The final value is absorbed into the dead-sum.
        drop(counter);
        assert_eq!(MANAGER.global_value(), 75);

        MANAGER.reset();
        assert_eq!(MANAGER.global_value(), 0);
    }

    #[test]
    fn sums_across_threads() {
        static ACROSS: Manager = Manager::new();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let counter = LocalCounter::register(&ACROSS);
                    for _ in 0..1000 {
                        counter.increment().unwrap();
                    }
                });
            }
        });

        // Every counter is dead; the dead-sum holds the total.
        assert_eq!(ACROSS.global_value(), 4000);
    }
}
