use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use parking_lot_core::SpinWait;

/// This bit is set in the `state` of a `SlotLock` when the slot holds a
/// valid main pair.
const POPULATED: u32 = 1 << 31;

/// This bit is set in the `state` of a `SlotLock` while a writer holds, or
/// is draining readers to acquire, the slot.
const WRITER: u32 = 1 << 30;

/// The remaining bits count the readers currently holding the slot.
const READERS: u32 = WRITER - 1;

/// A read-write spin lock on a single slot.
///
/// The lock word doubles as the slot-occupancy flag: acquiring in either
/// mode reports whether the slot's main pair is valid, and a writer chooses
/// the flag it releases with. The lock spins and yields; it never parks.
///
/// # State table:
///
///  31 (POPULATED) | 30 (WRITER) | 29..0 (READERS)
/// ----------------+-------------+--------------------------------------
///  the slot holds | a writer is | the number of readers holding the
///  a valid main   | holding or  | slot; a writer waits for this to
///  pair           | acquiring   | drain to zero before proceeding
pub struct SlotLock {
    state: AtomicU32,
}

impl SlotLock {
    pub const fn new() -> SlotLock {
        SlotLock {
            state: AtomicU32::new(0),
        }
    }

    /// Acquires the lock for reading, returning a guard that reports the
    /// occupancy flag and releases on drop.
    ///
    /// Any number of readers hold the lock concurrently; none proceed while
    /// a writer holds or is acquiring it.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_> {
        let mut spin = SpinWait::new();

        loop {
            let state = self.state.load(Ordering::Acquire);

            // Increment the reader count, unless a writer holds the slot.
            if state & WRITER == 0 {
                if self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return ReadGuard {
                        lock: self,
                        populated: state & POPULATED != 0,
                    };
                }
            }

            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    /// Acquires the lock for writing, returning a guard that reports the
    /// occupancy flag and releases on drop, publishing the flag the guard
    /// carries at that point.
    ///
    /// The writer bit is claimed first, shutting out new readers and
    /// writers, and then the reader count is waited down to zero.
    #[inline]
    pub fn write(&self) -> WriteGuard<'_> {
        let mut spin = SpinWait::new();

        loop {
            let state = self.state.load(Ordering::Acquire);

            if state & WRITER == 0 {
                if self
                    .state
                    .compare_exchange_weak(
                        state,
                        state | WRITER,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // Wait for the readers to drain.
                    let mut drain = SpinWait::new();
                    while self.state.load(Ordering::Acquire) & READERS != 0 {
                        if !drain.spin() {
                            thread::yield_now();
                        }
                    }

                    return WriteGuard {
                        lock: self,
                        populated: state & POPULATED != 0,
                    };
                }
            }

            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    /// Returns the occupancy flag through exclusive access, without locking.
    #[inline]
    pub fn populated(&mut self) -> bool {
        *self.state.get_mut() & POPULATED != 0
    }

    #[inline]
    fn read_unlock(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    fn write_unlock(&self, populated: bool) {
        // Clears the writer bit and the reader count in the same store that
        // publishes the occupancy flag.
        let state = if populated { POPULATED } else { 0 };
        self.state.store(state, Ordering::Release);
    }
}

/// Holds a `SlotLock` for reading until dropped.
pub struct ReadGuard<'a> {
    lock: &'a SlotLock,
    populated: bool,
}

impl ReadGuard<'_> {
    /// The occupancy flag captured at acquisition.
    #[inline]
    pub fn populated(&self) -> bool {
        self.populated
    }
}

impl Drop for ReadGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Holds a `SlotLock` for writing until dropped.
pub struct WriteGuard<'a> {
    lock: &'a SlotLock,
    populated: bool,
}

impl WriteGuard<'_> {
    /// The occupancy flag captured at acquisition.
    #[inline]
    pub fn populated(&self) -> bool {
        self.populated
    }

    /// Sets the occupancy flag to publish when the guard is dropped.
    #[inline]
    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
    }
}

impl Drop for WriteGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.write_unlock(self.populated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn carries_occupancy() {
        let lock = SlotLock::new();
        assert!(!lock.read().populated());

        let mut guard = lock.write();
        assert!(!guard.populated());
        guard.set_populated(true);
        drop(guard);

        assert!(lock.read().populated());
        assert!(lock.write().populated());
        assert!(lock.read().populated());

        let mut guard = lock.write();
        guard.set_populated(false);
        drop(guard);
        assert!(!lock.read().populated());
    }

    #[test]
    fn readers_share() {
        let lock = SlotLock::new();
        let a = lock.read();
        let b = lock.read();
        drop(a);
        drop(b);
    }

    #[test]
    fn writers_exclude() {
        let lock = SlotLock::new();
        let running = AtomicUsize::new(0);
        let barrier = Barrier::new(4);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..1000 {
                        let guard = lock.write();
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                        running.fetch_sub(1, Ordering::SeqCst);
                        drop(guard);
                    }
                });
            }
        });
    }

    #[test]
    fn writer_waits_for_readers() {
        let lock = SlotLock::new();
        let readers = AtomicUsize::new(0);
        let barrier = Barrier::new(3);

        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..1000 {
                        let guard = lock.read();
                        readers.fetch_add(1, Ordering::SeqCst);
                        readers.fetch_sub(1, Ordering::SeqCst);
                        drop(guard);
                    }
                });
            }

            s.spawn(|| {
                barrier.wait();
                for _ in 0..100 {
                    let guard = lock.write();
                    // Exclusive: no reader is between lock and unlock.
                    assert_eq!(readers.load(Ordering::SeqCst), 0);
                    drop(guard);
                }
            });
        });
    }
}
