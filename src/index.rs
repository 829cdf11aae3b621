//! Named lookup indexes over the cached values.
//!
//! An [`Index`] maps a key projected from each value to the value's
//! [`SlotId`] in the generation ring. It never owns values: a handle whose
//! node was evicted simply stops resolving, and the entry is overwritten the
//! next time a value with that key is inserted (or dropped wholesale when the
//! ring rebuilds the indexes).
//!
//! ```text
//!   Index "RoomID"                       Index "Name"
//!   FxHashMap<u32, SlotId>               FxHashMap<String, SlotId>
//!   ┌──────┬──────────┐                  ┌──────────┬──────────┐
//!   │ 7    │ {0, 3}   │──┐           ┌───│ "Hall"   │ {0, 3}   │
//!   │ 9    │ {2, 0}   │  │           │   │ "Attic"  │ {1, 0}   │── dead
//!   └──────┴──────────┘  ▼           ▼   └──────────┴──────────┘
//!                     SlotArena<Node> (generation ring)
//! ```
//!
//! ## Lookup path
//!
//! `get` reads the handle under the index's read lock, releases it, and
//! touches the node under the ring's ledger lock. On a miss the loader runs
//! with no cache lock held; the loaded value is then inserted into every
//! index through the owning cache, which resolves concurrent loads of the
//! same value to a single node.

use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::cache::Shared;
use crate::ds::SlotId;
use crate::error::CacheError;
use crate::lock::{DualModeLock, LockMode};
#[cfg(feature = "metrics")]
use crate::metrics::CacheMetricsRecorder;
use crate::ring::RingState;
use crate::traits::Loader;

/// Type-erased index operations driven by the cache and the ring.
pub(crate) trait IndexOps<V>: Send + Sync {
    fn name(&self) -> &str;

    /// Handle stored under `item`'s key, live or not.
    fn find_item(&self, item: &V) -> Result<Option<SlotId>, CacheError>;

    /// Points `item`'s key at `id`. Returns `true` if the key was present.
    fn add_item(&self, item: &V, id: SlotId) -> Result<bool, CacheError>;

    /// Whether `a` and `b` project to the same key in this index.
    fn same_key(&self, a: &V, b: &V) -> bool;

    fn clear(&self) -> Result<(), CacheError>;

    /// Replaces every entry with a handle to each live node; returns the
    /// new entry count.
    fn rebuild(&self, state: &RingState<V>) -> Result<usize, CacheError>;

    fn len(&self) -> Result<usize, CacheError>;

    /// The concrete index, for typed retrieval by name.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

type KeyFn<K, V> = Box<dyn Fn(&V) -> K + Send + Sync>;

/// Index state shared by every [`Index`] handle with the same name.
pub(crate) struct IndexCore<K, V> {
    name: String,
    key_of: KeyFn<K, V>,
    loader: Option<Box<dyn Loader<K, V>>>,
    entries: DualModeLock<FxHashMap<K, SlotId>>,
}

impl<K, V> IndexCore<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(
        name: String,
        key_of: KeyFn<K, V>,
        loader: Option<Box<dyn Loader<K, V>>>,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let mut map = FxHashMap::default();
        map.reserve(capacity.saturating_mul(2));
        let resource = format!("index `{}`", name);
        Self {
            name,
            key_of,
            loader,
            entries: DualModeLock::new(map, resource, timeout),
        }
    }

    fn handle(&self, key: &K) -> Result<Option<SlotId>, CacheError> {
        self.entries.with_read(|entries| entries.get(key).copied())
    }
}

impl<K, V> IndexOps<V> for IndexCore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn find_item(&self, item: &V) -> Result<Option<SlotId>, CacheError> {
        self.handle(&(self.key_of)(item))
    }

    fn add_item(&self, item: &V, id: SlotId) -> Result<bool, CacheError> {
        let key = (self.key_of)(item);
        self.entries
            .with_write(|entries| entries.insert(key, id).is_some())
    }

    fn same_key(&self, a: &V, b: &V) -> bool {
        (self.key_of)(a) == (self.key_of)(b)
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.with_write(|entries| entries.clear())
    }

    fn rebuild(&self, state: &RingState<V>) -> Result<usize, CacheError> {
        self.entries.with_write(|entries| {
            entries.clear();
            for (id, value) in state.iter() {
                entries.insert((self.key_of)(value), id);
            }
            entries.len()
        })
    }

    fn len(&self) -> Result<usize, CacheError> {
        self.entries.with_read(|entries| entries.len())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Handle to a named index of a [`GenerationalCache`](crate::cache::GenerationalCache).
///
/// Cheap to clone; all clones share the same entries.
pub struct Index<K, V> {
    core: Arc<IndexCore<K, V>>,
    shared: Arc<Shared<V>>,
}

impl<K, V> Clone for Index<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Index<K, V>
where
    K: Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_parts(core: Arc<IndexCore<K, V>>, shared: Arc<Shared<V>>) -> Self {
        Self { core, shared }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// A hit claims the value for the current generation. On a miss the
    /// loader (if any) runs without any cache lock held and the result is
    /// inserted into every index. If another index already caches an equal
    /// value, that value is returned instead of the freshly loaded one.
    ///
    /// `Ok(None)` means the key is not cached and could not be loaded.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        if let Some(value) = self.lookup(key)? {
            #[cfg(feature = "metrics")]
            self.shared.ring.metrics().record_hit();
            self.shared.check_valid()?;
            return Ok(Some(value));
        }
        #[cfg(feature = "metrics")]
        self.shared.ring.metrics().record_miss();

        let Some(loader) = &self.core.loader else {
            return Ok(None);
        };
        tracing::trace!(index = %self.core.name, ?key, "loading on miss");
        #[cfg(feature = "metrics")]
        self.shared.ring.metrics().record_load();
        let Some(item) = loader.load(key) else {
            #[cfg(feature = "metrics")]
            self.shared.ring.metrics().record_load_miss();
            return Ok(None);
        };

        let loaded = (self.core.key_of)(&item);
        if loaded != *key {
            tracing::warn!(
                index = %self.core.name,
                requested = ?key,
                loaded = ?loaded,
                "loader returned a value with a different key"
            );
        }
        self.shared.insert(item).map(Some)
    }

    fn lookup(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        match self.core.handle(key)? {
            Some(id) => self.shared.ring.touch_handle(id),
            None => Ok(None),
        }
    }

    /// Returns the cached value for `key` without touching or loading it.
    pub fn peek(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        match self.core.handle(key)? {
            Some(id) => self.shared.ring.peek_handle(id),
            None => Ok(None),
        }
    }

    /// `true` if a live value is cached under `key`.
    pub fn contains(&self, key: &K) -> Result<bool, CacheError> {
        Ok(self.peek(key)?.is_some())
    }

    /// Evicts the value cached under `key` from the whole cache.
    ///
    /// Other indexes keep a dead handle until it is overwritten or rebuilt
    /// away. Returns `true` if a live value was evicted.
    pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
        let id = {
            let mut scoped = self.core.entries.scoped(LockMode::Upgradable)?;
            let present = scoped
                .get()
                .is_some_and(|entries| entries.contains_key(key));
            if !present {
                return Ok(false);
            }
            scoped.set_mode(LockMode::Write)?;
            scoped.get_mut().and_then(|entries| entries.remove(key))
        };

        let removed = match id {
            Some(id) => self.shared.ring.evict_handle(id)?,
            None => false,
        };
        #[cfg(feature = "metrics")]
        if removed {
            self.shared.ring.metrics().record_removal();
        }
        self.shared.check_valid()?;
        Ok(removed)
    }

    /// Number of entries, including handles to evicted values that have not
    /// been overwritten or rebuilt away yet.
    pub fn len(&self) -> Result<usize, CacheError> {
        IndexOps::len(&*self.core)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

impl<K, V> Debug for Index<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.core.name)
            .field("has_loader", &self.core.loader.is_some())
            .finish_non_exhaustive()
    }
}
