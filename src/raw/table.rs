use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::bit_lock::SlotLock;
use super::probe;
use crate::map::Error;

/// A unit of contention: one lock, one main pair, and the pairs that
/// collided into the same address.
///
/// The main pair is valid iff the lock word's occupancy flag is set, and the
/// overflow list is non-empty only while the main pair is valid. All pair
/// accessors require the matching hold on `lock`.
pub struct Slot<K, V> {
    pub lock: SlotLock,
    main: UnsafeCell<MaybeUninit<(K, V)>>,
    overflow: UnsafeCell<Vec<(K, V)>>,
}

// Safety: a slot hands out references to its pairs only under its lock,
// with writers exclusive, so it behaves like an `RwLock<(K, V)>`.
unsafe impl<K: Send, V: Send> Send for Slot<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Slot<K, V> {}

impl<K, V> Slot<K, V> {
    fn new() -> Slot<K, V> {
        Slot {
            lock: SlotLock::new(),
            main: UnsafeCell::new(MaybeUninit::uninit()),
            overflow: UnsafeCell::new(Vec::new()),
        }
    }

    /// # Safety
    ///
    /// The caller holds the slot lock and the occupancy flag is set.
    #[inline]
    pub unsafe fn main(&self) -> &(K, V) {
        (*self.main.get()).assume_init_ref()
    }

    /// # Safety
    ///
    /// The caller holds the slot's write lock and the occupancy flag is set.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn main_mut(&self) -> &mut (K, V) {
        (*self.main.get()).assume_init_mut()
    }

    /// Writes the main pair of an empty slot.
    ///
    /// # Safety
    ///
    /// The caller holds the slot's write lock and the occupancy flag is
    /// clear (the previous pair, if any, is not dropped).
    #[inline]
    pub unsafe fn set_main(&self, pair: (K, V)) {
        (*self.main.get()).write(pair);
    }

    /// Drops the main pair, leaving the slot logically empty.
    ///
    /// # Safety
    ///
    /// The caller holds the slot's write lock, the occupancy flag is set,
    /// and the caller clears the flag before releasing.
    #[inline]
    pub unsafe fn drop_main(&self) {
        ptr::drop_in_place((*self.main.get()).as_mut_ptr());
    }

    /// # Safety
    ///
    /// The caller holds the slot lock.
    #[inline]
    pub unsafe fn overflow(&self) -> &Vec<(K, V)> {
        &*self.overflow.get()
    }

    /// # Safety
    ///
    /// The caller holds the slot's write lock.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn overflow_mut(&self) -> &mut Vec<(K, V)> {
        &mut *self.overflow.get()
    }
}

impl<K, V> Drop for Slot<K, V> {
    fn drop(&mut self) {
        // The overflow vector drops itself; the main pair is only valid
        // when the occupancy flag says so.
        if self.lock.populated() {
            unsafe { self.main.get_mut().assume_init_drop() };
        }
    }
}

/// The layered slot table.
///
/// Layer `i` is a boxed slice of `P[i] - P[i-1]` slots, allocated once and
/// never resized, relocated, or freed before the table drops; `last` names
/// the highest allocated layer and only ever increases. A layer pointer is
/// published before `last` is bumped, both with release stores, so any
/// thread that observes the new `last` can reach the new layer.
pub struct Table<K, V> {
    layers: [AtomicPtr<Slot<K, V>>; probe::MAX_LAYERS],
    last: AtomicUsize,
}

// Safety: the table owns its slots through raw layer pointers; access
// follows the slot rules above.
unsafe impl<K: Send, V: Send> Send for Table<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Table<K, V> {}

impl<K, V> Table<K, V> {
    /// Creates a table with layer zero allocated.
    pub fn new() -> Table<K, V> {
        let table = Table {
            layers: [const { AtomicPtr::new(ptr::null_mut()) }; probe::MAX_LAYERS],
            last: AtomicUsize::new(0),
        };

        table.layers[0].store(alloc_layer(probe::layer_len(0)), Ordering::Release);
        table
    }

    /// The highest allocated layer.
    #[inline]
    pub fn last(&self) -> usize {
        self.last.load(Ordering::Acquire)
    }

    /// The capacity boundary of the highest allocated layer.
    #[inline]
    pub fn last_prime(&self) -> usize {
        probe::prime(self.last())
    }

    /// Appends the next layer.
    ///
    /// Callers serialize growth externally: the growth callback runs under
    /// its manager's registry lock, and construction-time pre-growth has
    /// exclusive access. Concurrent readers and writers are fine; no
    /// existing slot is touched.
    pub fn allocate_layer(&self) -> Result<(), Error> {
        let next = self.last.load(Ordering::Acquire) + 1;
        if next == probe::MAX_LAYERS {
            return Err(Error::CapacityExceeded);
        }

        self.layers[next].store(alloc_layer(probe::layer_len(next)), Ordering::Release);
        self.last.store(next, Ordering::Release);
        Ok(())
    }

    /// Returns the slot at the given address.
    ///
    /// The address must come from `probe::locate` under a `last` this
    /// thread has observed.
    #[inline]
    pub fn slot(&self, address: probe::Address) -> &Slot<K, V> {
        let layer = self.layers[address.layer].load(Ordering::Acquire);
        debug_assert!(!layer.is_null());
        debug_assert!(address.slot < probe::layer_len(address.layer));

        // Safety: the layer was published before `last` was raised to cover
        // this address, and the offset is within the layer's fixed length.
        unsafe { &*layer.add(address.slot) }
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        for (layer, ptr) in self.layers.iter_mut().enumerate() {
            let ptr = *ptr.get_mut();
            if ptr.is_null() {
                break;
            }

            let len = probe::layer_len(layer);
            // Safety: round-trips the allocation made in `alloc_layer`.
            drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)) });
        }
    }
}

// Allocates a layer of `len` empty slots.
fn alloc_layer<K, V>(len: usize) -> *mut Slot<K, V> {
    let slots = (0..len).map(|_| Slot::<K, V>::new()).collect::<Box<[_]>>();
    Box::into_raw(slots).cast()
}
