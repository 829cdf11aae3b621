//! Multi-index generational cache.
//!
//! [`GenerationalCache`] owns one generation ring and a registry of named
//! indexes. Values are looked up through an [`Index`]; each index projects its
//! own key from the value, and any index may load values it does not have.
//!
//! ## Architecture
//!
//! ```text
//!   GenerationalCache<V> ──► Arc<Shared<V>>
//!                               │
//!            ┌──────────────────┴───────────────────┐
//!            ▼                                      ▼
//!   GenerationRing<V>                      RwLock<Vec<Arc<dyn IndexOps>>>
//!   ledger Mutex ◄── 1st                     registry ◄── 2nd
//!   SlotArena<Node>                          ├── "RoomID" IndexCore<u32, V>
//!   AgeBucket ring                           └── "Name"   IndexCore<String, V>
//!                                                         entries ◄── 3rd
//! ```
//!
//! Locks are always taken in the numbered order; no thread waits for the
//! ledger while it holds the registry or an index.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use gencache::builder::CacheBuilder;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Room {
//!     id: u32,
//!     name: String,
//! }
//!
//! let cache = CacheBuilder::new(1_000)
//!     .min_age(Duration::from_secs(60))
//!     .max_age(Duration::from_secs(600))
//!     .build::<Room>();
//!
//! let by_id = cache
//!     .add_index_with_loader(
//!         "RoomID",
//!         |room: &Room| room.id,
//!         |id: &u32| Some(Room { id: *id, name: format!("room {id}") }),
//!     )
//!     .unwrap();
//! let by_name = cache.add_index("Name", |room: &Room| room.name.clone()).unwrap();
//!
//! let loaded = by_id.get(&7).unwrap().unwrap();
//! let found = by_name.get(&"room 7".to_string()).unwrap().unwrap();
//! assert!(std::sync::Arc::ptr_eq(&loaded, &found));
//! assert_eq!(cache.len().unwrap(), 1);
//! ```

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CacheError;
use crate::index::{Index, IndexCore, IndexOps};
#[cfg(feature = "metrics")]
use crate::metrics::{CacheMetricsRecorder, CacheMetricsSnapshot};
use crate::ring::{CleanupReport, GenerationRing, IndexHooks, Maintenance, RingState};
use crate::traits::Loader;

type Registry<V> = Vec<Arc<dyn IndexOps<V>>>;

/// State shared by the cache facade and every index handle.
pub(crate) struct Shared<V> {
    pub(crate) ring: GenerationRing<V>,
    registry: RwLock<Registry<V>>,
}

impl<V> Shared<V>
where
    V: Send + Sync + 'static,
{
    fn read_registry(&self) -> Result<RwLockReadGuard<'_, Registry<V>>, CacheError> {
        let timeout = self.ring.lock_timeout();
        self.registry
            .try_read_for(timeout)
            .ok_or_else(|| CacheError::lock_timeout("index registry", timeout))
    }

    fn write_registry(&self) -> Result<RwLockWriteGuard<'_, Registry<V>>, CacheError> {
        let timeout = self.ring.lock_timeout();
        self.registry
            .try_write_for(timeout)
            .ok_or_else(|| CacheError::lock_timeout("index registry", timeout))
    }

    /// Inserts `item` into the ring and every index.
    ///
    /// If an index maps `item`'s key to a live node that carries the same key
    /// in every index, that node is touched and returned and `item` is
    /// dropped. Otherwise a new node is created and takes over every key it
    /// projects to. Finding, creating and indexing all happen under the
    /// ledger lock, so two threads inserting equal values end up sharing one
    /// node.
    pub(crate) fn insert(&self, item: V) -> Result<Arc<V>, CacheError> {
        let value = {
            let mut state = self.ring.lock_state()?;
            let indexes = self.read_registry()?;

            let mut existing = None;
            for index in indexes.iter() {
                let Some(id) = index.find_item(&item)? else {
                    continue;
                };
                let Some(cached) = state.get(id) else {
                    continue;
                };
                if !indexes.iter().all(|other| other.same_key(cached, &item)) {
                    continue;
                }
                if let Some(value) = self.ring.touch_locked(&mut state, id) {
                    existing = Some((id, value));
                    break;
                }
            }

            let created = existing.is_none();
            let (id, value) = match existing {
                Some(found) => found,
                None => {
                    let value = Arc::new(item);
                    let id = self.ring.admit(&mut state, Arc::clone(&value));
                    (id, value)
                },
            };

            let mut duplicate_key = false;
            for index in indexes.iter() {
                duplicate_key |= index.add_item(&value, id)?;
            }
            if created && !duplicate_key {
                state.note_index_entry();
            }

            #[cfg(feature = "metrics")]
            if created {
                self.ring.metrics().record_insert();
            } else {
                self.ring.metrics().record_duplicate();
            }
            value
        };
        self.check_valid()?;
        Ok(value)
    }

    pub(crate) fn check_valid(&self) -> Result<Maintenance, CacheError> {
        self.ring.check_valid(self)
    }
}

impl<V> IndexHooks<V> for Shared<V>
where
    V: Send + Sync + 'static,
{
    fn clear_indexes(&self) -> Result<(), CacheError> {
        for index in self.read_registry()?.iter() {
            index.clear()?;
        }
        Ok(())
    }

    fn rebuild_indexes(&self, state: &RingState<V>) -> Result<usize, CacheError> {
        let mut entries = 0;
        for index in self.read_registry()?.iter() {
            entries = index.rebuild(state)?;
        }
        Ok(entries)
    }
}

/// Capacity- and age-bounded cache with any number of named indexes.
///
/// Cloning is cheap; clones share the same contents.
pub struct GenerationalCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for GenerationalCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> GenerationalCache<V>
where
    V: Send + Sync + 'static,
{
    pub(crate) fn from_ring(ring: GenerationRing<V>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ring,
                registry: RwLock::new(Vec::new()),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared<V> {
        &self.shared
    }

    /// Registers an index without a loader; misses return `Ok(None)`.
    ///
    /// The new index is filled with every value already cached. Registering
    /// a name that already exists replaces the old index; handles to the old
    /// one keep working but are no longer kept up to date.
    pub fn add_index<K, F>(
        &self,
        name: impl Into<String>,
        key_of: F,
    ) -> Result<Index<K, V>, CacheError>
    where
        K: Eq + Hash + Debug + Send + Sync + 'static,
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        self.register(name.into(), Box::new(key_of), None)
    }

    /// Registers an index that calls `loader` on a miss.
    pub fn add_index_with_loader<K, F, L>(
        &self,
        name: impl Into<String>,
        key_of: F,
        loader: L,
    ) -> Result<Index<K, V>, CacheError>
    where
        K: Eq + Hash + Debug + Send + Sync + 'static,
        F: Fn(&V) -> K + Send + Sync + 'static,
        L: Loader<K, V> + 'static,
    {
        self.register(name.into(), Box::new(key_of), Some(Box::new(loader)))
    }

    fn register<K>(
        &self,
        name: String,
        key_of: Box<dyn Fn(&V) -> K + Send + Sync>,
        loader: Option<Box<dyn Loader<K, V>>>,
    ) -> Result<Index<K, V>, CacheError>
    where
        K: Eq + Hash + Debug + Send + Sync + 'static,
    {
        let ring = &self.shared.ring;
        let core = Arc::new(IndexCore::new(
            name,
            key_of,
            loader,
            ring.config().capacity,
            ring.lock_timeout(),
        ));

        let state = ring.lock_state()?;
        let backfilled = core.rebuild(&state)?;
        let mut registry = self.shared.write_registry()?;
        let ops: Arc<dyn IndexOps<V>> = core.clone();
        match registry.iter_mut().find(|index| index.name() == ops.name()) {
            Some(slot) => {
                tracing::debug!(index = ops.name(), backfilled, "replacing index");
                *slot = ops;
            },
            None => {
                tracing::debug!(index = ops.name(), backfilled, "registered index");
                registry.push(ops);
            },
        }
        drop(registry);
        drop(state);

        Ok(Index::from_parts(core, Arc::clone(&self.shared)))
    }

    /// Typed handle to the index called `name`.
    ///
    /// `None` if no such index exists or its key type is not `K`.
    pub fn index<K>(&self, name: &str) -> Result<Option<Index<K, V>>, CacheError>
    where
        K: Eq + Hash + Debug + Send + Sync + 'static,
    {
        let found = self
            .shared
            .read_registry()?
            .iter()
            .find(|index| index.name() == name)
            .cloned();
        let Some(ops) = found else {
            return Ok(None);
        };
        Ok(ops
            .as_any()
            .downcast::<IndexCore<K, V>>()
            .ok()
            .map(|core| Index::from_parts(core, Arc::clone(&self.shared))))
    }

    /// Looks `key` up (loading on a miss) through the index called `name`.
    pub fn get_value<K>(&self, name: &str, key: &K) -> Result<Option<Arc<V>>, CacheError>
    where
        K: Eq + Hash + Debug + Send + Sync + 'static,
    {
        match self.index::<K>(name)? {
            Some(index) => index.get(key),
            None => Ok(None),
        }
    }

    /// Names of the registered indexes in registration order.
    pub fn index_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .shared
            .read_registry()?
            .iter()
            .map(|index| index.name().to_string())
            .collect())
    }

    /// Adds `item` to the cache without going through a loader.
    ///
    /// Returns the cached value, which is an already cached equal value if
    /// one of the indexes has it.
    pub fn add_item(&self, item: V) -> Result<Arc<V>, CacheError> {
        self.shared.insert(item)
    }

    /// Drops every cached value and empties every index.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.shared.ring.clear(&*self.shared)
    }

    /// Runs maintenance if it is due and no other thread is running it.
    pub fn check_valid(&self) -> Result<Maintenance, CacheError> {
        self.shared.check_valid()
    }

    /// Runs a clean-up pass now, whether or not one is due.
    pub fn clean_up(&self) -> Result<CleanupReport, CacheError> {
        self.shared.ring.clean_up(&*self.shared)
    }

    /// Number of live cached values.
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.shared.ring.lock_state()?.live())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Index entries created since the last rebuild.
    pub fn total_count(&self) -> Result<usize, CacheError> {
        Ok(self.shared.ring.lock_state()?.total())
    }

    /// Number of generations between the oldest and the current bucket.
    pub fn generation_span(&self) -> Result<u64, CacheError> {
        Ok(self.shared.ring.lock_state()?.generation_span())
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.config().capacity
    }

    pub fn min_age(&self) -> Duration {
        self.shared.ring.config().min_age
    }

    /// Effective maximum age, after capping at twelve hours.
    pub fn max_age(&self) -> Duration {
        self.shared.ring.config().max_age
    }

    pub fn time_slice(&self) -> Duration {
        self.shared.ring.config().time_slice
    }

    /// Counters plus the current live/total/generation gauges.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Result<CacheMetricsSnapshot, CacheError> {
        let mut snapshot = self.shared.ring.metrics().snapshot();
        let state = self.shared.ring.lock_state()?;
        snapshot.live = state.live();
        snapshot.total = state.total();
        snapshot.capacity = self.capacity();
        snapshot.generation_span = state.generation_span();
        Ok(snapshot)
    }

    /// Zeroes the counters.
    #[cfg(feature = "metrics")]
    pub fn reset_metrics(&self) {
        use crate::metrics::MetricsReset;
        self.shared.ring.metrics().reset_metrics();
    }
}

impl<V> Debug for GenerationalCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationalCache")
            .field("ring", &self.shared.ring)
            .field(
                "indexes",
                &self
                    .shared
                    .registry
                    .try_read()
                    .map_or_else(|| "<locked>".to_string(), |r| r.len().to_string()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::builder::CacheBuilder;

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        id: u64,
        email: String,
    }

    fn account(id: u64) -> Account {
        Account {
            id,
            email: format!("user{}@example.com", id),
        }
    }

    fn load_account(id: &u64) -> Option<Account> {
        Some(account(*id))
    }

    fn load_by_email(email: &String) -> Option<Account> {
        email
            .strip_prefix("user")
            .and_then(|rest| rest.strip_suffix("@example.com"))
            .and_then(|id| id.parse().ok())
            .map(account)
    }

    mod registry {
        use super::*;

        #[test]
        fn typed_retrieval_by_name() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            cache.add_index("ID", |a: &Account| a.id).unwrap();

            assert!(cache.index::<u64>("ID").unwrap().is_some());
            assert!(cache.index::<String>("ID").unwrap().is_none());
            assert!(cache.index::<u64>("missing").unwrap().is_none());
            assert_eq!(cache.index_names().unwrap(), vec!["ID".to_string()]);
        }

        #[test]
        fn new_index_is_backfilled() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let by_id = cache.add_index("ID", |a: &Account| a.id).unwrap();
            cache.add_item(account(1)).unwrap();
            cache.add_item(account(2)).unwrap();

            let by_email = cache.add_index("Email", |a: &Account| a.email.clone()).unwrap();
            assert_eq!(by_email.len().unwrap(), 2);
            let via_email = by_email.get(&account(2).email).unwrap().unwrap();
            let via_id = by_id.get(&2).unwrap().unwrap();
            assert!(Arc::ptr_eq(&via_email, &via_id));
        }

        #[test]
        fn re_registering_a_name_replaces_the_index() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            cache.add_index("key", |a: &Account| a.id).unwrap();
            cache.add_index("key", |a: &Account| a.email.clone()).unwrap();

            assert_eq!(cache.index_names().unwrap().len(), 1);
            assert!(cache.index::<u64>("key").unwrap().is_none());
            assert!(cache.index::<String>("key").unwrap().is_some());
        }

        #[test]
        fn get_value_goes_through_named_index() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            cache
                .add_index_with_loader("ID", |a: &Account| a.id, load_account)
                .unwrap();
            let value = cache.get_value("ID", &5u64).unwrap().unwrap();
            assert_eq!(value.id, 5);
            assert_eq!(cache.get_value("nope", &5u64).unwrap(), None);
        }
    }

    mod dedup {
        use super::*;

        #[test]
        fn loads_through_different_indexes_share_one_node() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let by_id = cache
                .add_index_with_loader("ID", |a: &Account| a.id, load_account)
                .unwrap();
            let by_email = cache
                .add_index_with_loader("Email", |a: &Account| a.email.clone(), load_by_email)
                .unwrap();

            let a = by_id.get(&3).unwrap().unwrap();
            let b = by_email.get(&account(3).email).unwrap().unwrap();
            assert!(Arc::ptr_eq(&a, &b));
            assert_eq!(cache.len().unwrap(), 1);
            assert_eq!(cache.total_count().unwrap(), 1);
        }

        #[test]
        fn add_item_of_cached_value_returns_existing() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            cache.add_index("ID", |a: &Account| a.id).unwrap();
            let first = cache.add_item(account(1)).unwrap();
            let second = cache.add_item(account(1)).unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(cache.len().unwrap(), 1);
        }

        #[test]
        fn changed_secondary_key_gets_a_fresh_node() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let by_id = cache.add_index("ID", |a: &Account| a.id).unwrap();
            let by_email = cache
                .add_index_with_loader("Email", |a: &Account| a.email.clone(), |email: &String| {
                    Some(Account {
                        id: 7,
                        email: email.clone(),
                    })
                })
                .unwrap();

            let hall = cache
                .add_item(Account {
                    id: 7,
                    email: "hall@example.com".to_string(),
                })
                .unwrap();
            let lobby = by_email
                .get(&"lobby@example.com".to_string())
                .unwrap()
                .unwrap();

            assert_eq!(lobby.email, "lobby@example.com");
            assert!(!Arc::ptr_eq(&hall, &lobby));
            let by_new_email = by_email.peek(&"lobby@example.com".to_string()).unwrap();
            assert!(by_new_email.is_some_and(|v| Arc::ptr_eq(&v, &lobby)));
            let by_shared_id = by_id.peek(&7).unwrap();
            assert!(by_shared_id.is_some_and(|v| Arc::ptr_eq(&v, &lobby)));
            let by_old_email = by_email.peek(&"hall@example.com".to_string()).unwrap();
            assert!(by_old_email.is_some_and(|v| Arc::ptr_eq(&v, &hall)));
        }

        #[cfg(feature = "metrics")]
        #[test]
        fn metrics_count_hits_loads_and_duplicates() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let by_id = cache
                .add_index_with_loader("ID", |a: &Account| a.id, load_account)
                .unwrap();
            by_id.get(&1).unwrap();
            by_id.get(&1).unwrap();
            cache.add_item(account(1)).unwrap();

            let snap = cache.metrics().unwrap();
            assert_eq!(snap.hits, 1);
            assert_eq!(snap.misses, 1);
            assert_eq!(snap.loads, 1);
            assert_eq!(snap.inserts, 1);
            assert_eq!(snap.duplicates, 1);
            assert_eq!(snap.live, 1);
            assert_eq!(snap.capacity, 10);

            cache.reset_metrics();
            assert_eq!(cache.metrics().unwrap().hits, 0);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn debug_does_not_block_on_a_held_registry() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            cache.add_index("ID", |a: &Account| a.id).unwrap();
            assert!(format!("{:?}", cache).contains("indexes: \"1\""));

            let _registry = cache.shared().write_registry().unwrap();
            assert!(format!("{:?}", cache).contains("<locked>"));
        }

        #[test]
        fn clear_empties_ring_and_indexes() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let by_id = cache.add_index("ID", |a: &Account| a.id).unwrap();
            for id in 0..5 {
                cache.add_item(account(id)).unwrap();
            }
            cache.clear().unwrap();
            assert!(cache.is_empty().unwrap());
            assert_eq!(by_id.len().unwrap(), 0);
            assert_eq!(cache.total_count().unwrap(), 0);
            assert_eq!(cache.generation_span().unwrap(), 0);
        }

        #[test]
        fn drift_rebuild_reclaims_dead_index_entries() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(2).build();
            let by_id = cache.add_index("ID", |a: &Account| a.id).unwrap();
            let by_email = cache.add_index("Email", |a: &Account| a.email.clone()).unwrap();

            for id in 0..20 {
                cache.add_item(account(id)).unwrap();
                by_id.remove(&id).unwrap();
                assert!(by_email.len().unwrap() <= 4, "dead handles never rebuilt away");
            }
            assert!(cache.total_count().unwrap() <= 4);
            assert_eq!(by_id.len().unwrap(), 0);
        }

        #[test]
        fn clones_share_contents() {
            let cache: GenerationalCache<Account> = CacheBuilder::new(10).build();
            let other = cache.clone();
            let loads = Arc::new(AtomicUsize::new(0));
            let counter = loads.clone();
            let by_id = cache
                .add_index_with_loader("ID", |a: &Account| a.id, move |id: &u64| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    load_account(id)
                })
                .unwrap();

            by_id.get(&1).unwrap();
            other.get_value("ID", &1u64).unwrap();
            assert_eq!(loads.load(Ordering::SeqCst), 1);
            assert_eq!(other.len().unwrap(), 1);
        }
    }
}
