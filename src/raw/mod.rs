mod bit_lock;
mod count;
mod instance;
mod probe;
mod table;
mod utils;

pub use instance::MAX_INSTANCES;

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use self::table::{Slot, Table};
use crate::map::Error;

/// A layered concurrent hash map.
///
/// Keys address a `(layer, slot)` pair derived from their hash under the
/// table's current layer bound; the slot's lock serializes access, and
/// colliding keys chain into the slot's overflow list.
///
/// Because growth never moves an entry, an entry stays reachable at the
/// address derived under the layer bound current at its insertion. Lookups
/// therefore probe the addresses derived under each bound the table has had,
/// newest first; fresh inserts land at the newest address.
pub struct HashMap<K, V, S> {
    /// The slot storage, shared with the growth callback installed in this
    /// instance's manager.
    table: Arc<Table<K, V>>,

    /// The leased instance-pool index, and with it the manager tracking
    /// this map's size.
    instance: usize,

    /// The layer bound at construction. No entry was ever placed under an
    /// earlier bound, so probing stops here.
    base: usize,

    build_hasher: S,
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a map that can hold at least `capacity` entries before
    /// growing.
    pub fn new(capacity: usize, build_hasher: S) -> Result<HashMap<K, V, S>, Error> {
        let instance = instance::acquire()?;
        let table = Arc::new(Table::new());

        // The growth policy: appending a layer whenever the global count
        // passes the capacity boundary keeps the per-slot chains near
        // constant length. The manager invokes this under its registry
        // lock, which is what serializes growth.
        let growth = table.clone();
        instance::manager(instance).set_callback(Box::new(move |global| {
            if global > growth.last_prime() {
                growth.allocate_layer()?;
            }

            Ok(growth.last_prime())
        }));

        while table.last_prime() < capacity {
            if let Err(err) = table.allocate_layer() {
                instance::release(instance);
                return Err(err);
            }
        }

        Ok(HashMap {
            base: table.last(),
            table,
            instance,
            build_hasher,
        })
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns the exact number of entries in the map, as of the instant
    /// the manager's quiesce and registry locks are both held.
    pub fn len(&self) -> usize {
        instance::manager(self.instance).global_value()
    }

    /// Calls `f` on every entry, read-locking one slot at a time.
    ///
    /// Entries within a slot are seen atomically; the map as a whole is
    /// not snapshotted.
    pub fn try_for_each<E>(&self, mut f: impl FnMut(&K, &V) -> Result<(), E>) -> Result<(), E> {
        for layer in 0..=self.table.last() {
            for index in 0..probe::layer_len(layer) {
                let slot = self.table.slot(probe::Address { layer, slot: index });

                let guard = slot.lock.read();
                if guard.populated() {
                    // Safety: read lock held, occupancy checked.
                    let (key, value) = unsafe { slot.main() };
                    f(key, value)?;

                    for (key, value) in unsafe { slot.overflow() } {
                        f(key, value)?;
                    }
                }
            }
        }

        Ok(())
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
        S: BuildHasher,
    {
        self.build_hasher.hash_one(key) as usize
    }

    #[inline]
    fn added(&self) -> Result<(), Error> {
        instance::with_counter(self.instance, |counter| counter.increment())
    }

    #[inline]
    fn removed(&self) {
        instance::with_counter(self.instance, |counter| counter.decrement());
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a copy of the value of `key`, or `None` if it is absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = self.hash(key);

        let mut prev = usize::MAX;
        for generation in (self.base..=self.table.last()).rev() {
            let raw = probe::raw_hash(hash, generation);
            if raw == prev {
                continue;
            }
            prev = raw;

            let slot = self.table.slot(probe::locate(raw));
            let guard = slot.lock.read();
            if !guard.populated() {
                continue;
            }

            // Safety: read lock held, occupancy checked.
            let (main, value) = unsafe { slot.main() };
            if main.borrow() == key {
                return Some(value.clone());
            }

            let overflow = unsafe { slot.overflow() };
            if let Some((_, value)) = overflow.iter().find(|(k, _)| k.borrow() == key) {
                return Some(value.clone());
            }
        }

        None
    }

    /// Returns whether the map holds an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);

        let mut prev = usize::MAX;
        for generation in (self.base..=self.table.last()).rev() {
            let raw = probe::raw_hash(hash, generation);
            if raw == prev {
                continue;
            }
            prev = raw;

            let slot = self.table.slot(probe::locate(raw));
            let guard = slot.lock.read();
            if !guard.populated() {
                continue;
            }

            // Safety: read lock held, occupancy checked.
            if unsafe { slot.main() }.0.borrow() == key {
                return true;
            }

            if unsafe { slot.overflow() }.iter().any(|(k, _)| k.borrow() == key) {
                return true;
            }
        }

        false
    }

    /// Inserts `value` for `key`, overwriting in place if the key is
    /// already present.
    ///
    /// The only failure is capacity exhaustion in an implicit growth this
    /// insertion triggered; the entry itself has been stored even then.
    pub fn insert(&self, key: K, value: V) -> Result<(), Error> {
        let hash = self.hash(&key);
        let last = self.table.last();
        let newest = probe::locate(probe::raw_hash(hash, last));

        if last == self.base {
            return self.insert_at(self.table.slot(newest), key, value);
        }

        // The key may live at the address derived under any earlier layer
        // bound; if so, update it in place.
        let mut prev = usize::MAX;
        for generation in (self.base..=last).rev() {
            let raw = probe::raw_hash(hash, generation);
            if raw == prev {
                continue;
            }
            prev = raw;

            let slot = self.table.slot(probe::locate(raw));
            let guard = slot.lock.write();
            if !guard.populated() {
                continue;
            }

            // Safety: write lock held, occupancy checked.
            if unsafe { slot.main() }.0 == key {
                unsafe { slot.main_mut() }.1 = value;
                return Ok(());
            }

            let overflow = unsafe { slot.overflow_mut() };
            if let Some(pair) = overflow.iter_mut().find(|(k, _)| *k == key) {
                pair.1 = value;
                return Ok(());
            }
        }

        // Absent at every generation: insert at the newest address,
        // re-checking under the lock in case a racing insert landed it.
        self.insert_at(self.table.slot(newest), key, value)
    }

    /// Removes `key`, returning whether a deletion occurred.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);

        let mut prev = usize::MAX;
        for generation in (self.base..=self.table.last()).rev() {
            let raw = probe::raw_hash(hash, generation);
            if raw == prev {
                continue;
            }
            prev = raw;

            let slot = self.table.slot(probe::locate(raw));
            let mut guard = slot.lock.write();
            if !guard.populated() {
                continue;
            }

            // Safety: write lock held, occupancy checked.
            if unsafe { slot.main() }.0.borrow() == key {
                let overflow = unsafe { slot.overflow_mut() };
                if let Some(pair) = overflow.pop() {
                    // The last collided pair becomes the new main pair,
                    // erasing the old one.
                    *unsafe { slot.main_mut() } = pair;
                } else {
                    unsafe { slot.drop_main() };
                    guard.set_populated(false);
                }
            } else {
                let overflow = unsafe { slot.overflow_mut() };
                match overflow.iter().position(|(k, _)| k.borrow() == key) {
                    Some(i) => {
                        overflow.swap_remove(i);
                    }
                    None => continue,
                }
            }

            self.removed();
            return true;
        }

        false
    }

    // Insert-or-update entirely within one slot.
    fn insert_at(&self, slot: &Slot<K, V>, key: K, value: V) -> Result<(), Error> {
        let mut guard = slot.lock.write();

        if !guard.populated() {
            // Safety: write lock held; the slot is empty.
            unsafe { slot.set_main((key, value)) };
            guard.set_populated(true);
            return self.added();
        }

        // Safety: write lock held, occupancy checked.
        if unsafe { slot.main() }.0 == key {
            unsafe { slot.main_mut() }.1 = value;
            return Ok(());
        }

        let overflow = unsafe { slot.overflow_mut() };
        match overflow.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => {
                pair.1 = value;
                Ok(())
            }
            None => {
                overflow.push((key, value));
                self.added()
            }
        }
    }
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        // Resetting the manager drops the growth callback's handle on the
        // table; the index then goes back for reuse.
        instance::release(self.instance);
    }
}
