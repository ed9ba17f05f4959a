use crate::raw;

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// An error from a map operation.
///
/// Everything else is reported in-band: a read of an absent key is `None`
/// and a deletion of an absent key is `false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The table cannot grow past its final layer.
    #[error("map capacity exceeded: no further layers can be allocated")]
    CapacityExceeded,

    /// Every one of the process' [`MAX_INSTANCES`](crate::MAX_INSTANCES)
    /// map instances is live.
    #[error("no free map instance slots in this process")]
    InstancePoolExhausted,
}

/// A concurrent hash map for read-heavy workloads.
///
/// The map is usable from any number of threads through a shared reference;
/// no external lock is needed. Every key addresses one slot of a layered
/// table, and that slot's read-write lock is the only synchronization an
/// operation takes on the hot path.
///
/// Growth appends layers instead of rehashing: existing entries are never
/// moved, so concurrent readers and writers never see a slot change address
/// under them. Reads return a *copy* of the value (`V: Clone`), which is
/// what lets a reader leave the slot as soon as it returns.
///
/// The length is tracked by per-thread counters, so [`HashMap::len`] is
/// exact but briefly pauses mutators; see its documentation.
///
/// # Examples
///
/// ```
/// use strata::HashMap;
///
/// let map = HashMap::new()?;
/// map.insert("alpha", 7)?;
///
/// assert_eq!(map.get("alpha"), Some(7));
/// assert_eq!(map.len(), 1);
///
/// assert!(map.remove("alpha"));
/// assert_eq!(map.get("alpha"), None);
/// # Ok::<(), strata::Error>(())
/// ```
pub struct HashMap<K, V, S = RandomState> {
    raw: raw::HashMap<K, V, S>,
}

// Safety: keys and values are only handed out by copy or through shared
// references to the map; mutation moves pairs in and out under the slot's
// write lock. The growth callback shares the table with whichever thread
// runs the manager update, so `K` and `V` must be `Send + Sync` even for
// the map to be `Send`.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send> Send for HashMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for HashMap<K, V, S> {}

/// A builder for a [`HashMap`].
///
/// # Examples
///
/// ```
/// use std::collections::hash_map::RandomState;
/// use strata::HashMap;
///
/// let map: HashMap<u64, u64> = HashMap::builder()
///     // Set the initial capacity.
///     .capacity(4096)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Construct the hash map.
///     .build()?;
/// # Ok::<(), strata::Error>(())
/// ```
pub struct HashMapBuilder<K, V, S = RandomState> {
    hasher: S,
    capacity: usize,
    _kv: PhantomData<(K, V)>,
}

impl<K, V> HashMapBuilder<K, V> {
    /// Set the hash builder used to hash keys.
    ///
    /// Warning: `hasher` is normally randomly generated, and is designed to
    /// allow the map to be resistant to attacks that cause many collisions
    /// and very poor performance. Setting it manually using this function
    /// can expose a DoS attack vector.
    pub fn hasher<S>(self, hasher: S) -> HashMapBuilder<K, V, S> {
        HashMapBuilder {
            hasher,
            capacity: self.capacity,
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> HashMapBuilder<K, V, S> {
    /// Set the initial capacity of the map.
    ///
    /// The table will be able to hold at least `capacity` entries before it
    /// first grows.
    pub fn capacity(self, capacity: usize) -> HashMapBuilder<K, V, S> {
        HashMapBuilder {
            capacity,
            hasher: self.hasher,
            _kv: PhantomData,
        }
    }

    /// Construct a [`HashMap`] from the builder, using the configured
    /// options.
    pub fn build(self) -> Result<HashMap<K, V, S>, Error>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        Ok(HashMap {
            raw: raw::HashMap::new(self.capacity, self.hasher)?,
        })
    }
}

impl<K, V, S> fmt::Debug for HashMapBuilder<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMapBuilder")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<K, V> HashMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty `HashMap`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InstancePoolExhausted`] if
    /// [`MAX_INSTANCES`](crate::MAX_INSTANCES) maps are already live in
    /// this process.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::new()?;
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn new() -> Result<HashMap<K, V>, Error> {
        HashMap::with_capacity_and_hasher(0, RandomState::new())
    }

    /// Creates an empty `HashMap` that can hold at least `capacity` entries
    /// before growing.
    ///
    /// Sizing the map up front moves the growth work out of the insertion
    /// path entirely.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::with_capacity(10_000)?;
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn with_capacity(capacity: usize) -> Result<HashMap<K, V>, Error> {
        HashMap::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashMap`.
    pub fn builder() -> HashMapBuilder<K, V> {
        HashMapBuilder {
            capacity: 0,
            hasher: RandomState::new(),
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty `HashMap` which will use the given hash builder to
    /// hash keys.
    pub fn with_hasher(hash_builder: S) -> Result<HashMap<K, V, S>, Error> {
        HashMap::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty `HashMap` with at least the specified capacity,
    /// using `hash_builder` to hash the keys.
    pub fn with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<HashMap<K, V, S>, Error> {
        Ok(HashMap {
            raw: raw::HashMap::new(capacity, hash_builder)?,
        })
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns the number of entries in the map.
    ///
    /// The count is exact: mutating operations in flight on other threads
    /// are paused at their completion point for the instant the count is
    /// taken. Prefer not to call this on a hot path.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    ///
    /// let map = HashMap::new()?;
    /// map.insert(1, "a")?;
    /// map.insert(2, "b")?;
    /// assert_eq!(map.len(), 2);
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a copy of the value corresponding to `key`, or `None` if the
    /// key is absent.
    ///
    /// The key may be any borrowed form of the map's key type, with matching
    /// `Hash` and `Eq`.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    ///
    /// let map = HashMap::new()?;
    /// map.insert(String::from("alpha"), 7)?;
    ///
    /// assert_eq!(map.get("alpha"), Some(7));
    /// assert_eq!(map.get("beta"), None);
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.raw.get(key)
    }

    /// Returns `true` if the map holds an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.contains_key(key)
    }

    /// Inserts a value for `key`, overwriting in place if the key is
    /// already present.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CapacityExceeded`] if the insertion triggered a
    /// growth past the table's final layer. The entry has still been stored
    /// and the map remains usable at its current capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    ///
    /// let map = HashMap::new()?;
    /// map.insert(37, "a")?;
    /// map.insert(37, "b")?;
    /// assert_eq!(map.get(&37), Some("b"));
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn insert(&self, key: K, value: V) -> Result<(), Error> {
        self.raw.insert(key, value)
    }

    /// Removes the entry for `key`, returning `true` if one was present.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::HashMap;
    ///
    /// let map = HashMap::new()?;
    /// map.insert(1, "a")?;
    /// assert!(map.remove(&1));
    /// assert!(!map.remove(&1));
    /// # Ok::<(), strata::Error>(())
    /// ```
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.remove(key)
    }
}

impl<K, V, S> fmt::Debug for HashMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        let _ = self.raw.try_for_each::<()>(|key, value| {
            map.entry(key, value);
            Ok(())
        });
        map.finish()
    }
}

#[cfg(feature = "serde")]
impl<K, V, S> HashMap<K, V, S> {
    pub(crate) fn raw(&self) -> &raw::HashMap<K, V, S> {
        &self.raw
    }
}
