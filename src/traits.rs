//! # Collaborator Traits
//!
//! The cache never talks to a backing store directly. It is handed two kinds
//! of collaborators at construction time:
//!
//! ```text
//!   ┌──────────────────────────────┐      ┌──────────────────────────────┐
//!   │        Loader<K, V>          │      │        ValidityCheck         │
//!   │                              │      │                              │
//!   │  load(&K) → Option<V>        │      │  is_valid() → bool           │
//!   │  one per index, called on a  │      │  one per cache, consulted at │
//!   │  miss with no lock held      │      │  most once per time slice    │
//!   └──────────────────────────────┘      └──────────────────────────────┘
//!            ▲           ▲                         ▲            ▲
//!            │           │                         │            │
//!    Fn(&K) -> Option<V> │                  Fn() -> bool   VersionCheck<F>
//!                   Fallible<F>
//! ```
//!
//! Both are implemented for plain closures, so most callers never name the
//! traits. [`Fallible`] adapts loaders that can fail; a failure is logged and
//! treated exactly like "not found". [`VersionCheck`] implements the usual
//! staleness test of comparing a stored version counter against a freshly
//! fetched one.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use gencache::traits::{Fallible, Loader, ValidityCheck, VersionCheck};
//!
//! let plain = |id: &u32| (*id < 10).then(|| format!("room {id}"));
//! assert_eq!(plain.load(&3), Some("room 3".to_string()));
//!
//! let fallible = Fallible(|id: &u32| -> Result<Option<String>, String> {
//!     Err(format!("connection reset while loading {id}"))
//! });
//! assert_eq!(fallible.load(&3), None);
//!
//! let version = Arc::new(AtomicU64::new(1));
//! let source = version.clone();
//! let check = VersionCheck::new(move || source.load(Ordering::SeqCst));
//! assert!(check.is_valid());
//! version.store(2, Ordering::SeqCst);
//! assert!(!check.is_valid());
//! assert!(check.is_valid());
//! ```

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

/// Loads an item from the backing store when an index misses.
///
/// Must be safe to call concurrently and must not call back into the cache.
pub trait Loader<K, V>: Send + Sync {
    /// Returns the item for `key`, or `None` if the backing store has none.
    fn load(&self, key: &K) -> Option<V>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> Option<V> + Send + Sync,
{
    #[inline]
    fn load(&self, key: &K) -> Option<V> {
        self(key)
    }
}

/// Adapts a fallible loader; errors are logged and become misses.
pub struct Fallible<F>(pub F);

impl<K, V, E, F> Loader<K, V> for Fallible<F>
where
    F: Fn(&K) -> Result<Option<V>, E> + Send + Sync,
    K: Debug,
    E: Display,
{
    fn load(&self, key: &K) -> Option<V> {
        match (self.0)(key) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(?key, error = %err, "loader failed, treating as a miss");
                None
            },
        }
    }
}

impl<F> Debug for Fallible<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallible").finish_non_exhaustive()
    }
}

/// Decides whether the cached data still matches the backing store.
///
/// Returning `false` flushes the whole cache.
pub trait ValidityCheck: Send + Sync {
    fn is_valid(&self) -> bool;
}

impl<F> ValidityCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    #[inline]
    fn is_valid(&self) -> bool {
        self()
    }
}

/// Staleness check that compares the last seen version counter with a
/// freshly fetched one.
///
/// The counter is fetched once on construction, so the first
/// [`is_valid`](ValidityCheck::is_valid) call only reports a change that
/// happened after the check was created. Each call stores the fetched
/// version, so a single change is reported exactly once.
pub struct VersionCheck<F> {
    fetch: F,
    last: AtomicU64,
}

impl<F> VersionCheck<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    pub fn new(fetch: F) -> Self {
        let last = AtomicU64::new(fetch());
        Self { fetch, last }
    }

    /// The version seen by the most recent check.
    pub fn last_version(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

impl<F> ValidityCheck for VersionCheck<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    fn is_valid(&self) -> bool {
        let current = (self.fetch)();
        let previous = self.last.swap(current, Ordering::AcqRel);
        if previous != current {
            tracing::debug!(previous, current, "backing store version changed");
        }
        previous == current
    }
}

impl<F> Debug for VersionCheck<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionCheck")
            .field("last", &self.last.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn closure_loader_passes_through() {
        let loader = |k: &u32| if *k == 1 { Some("one") } else { None };
        assert_eq!(Loader::load(&loader, &1), Some("one"));
        assert_eq!(Loader::load(&loader, &2), None);
    }

    #[test]
    fn fallible_loader_maps_errors_to_miss() {
        let loader = Fallible(|k: &u32| -> Result<Option<u32>, &'static str> {
            if *k == 0 {
                Err("boom")
            } else {
                Ok(Some(*k * 2))
            }
        });
        assert_eq!(loader.load(&0), None);
        assert_eq!(loader.load(&4), Some(8));
    }

    #[test]
    fn closure_validity_check() {
        let always = || true;
        let never = || false;
        assert!(always.is_valid());
        assert!(!never.is_valid());
    }

    #[test]
    fn version_check_primes_on_construction() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counted = fetches.clone();
        let check = VersionCheck::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            42
        });
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(check.last_version(), 42);
        assert!(check.is_valid());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn version_check_reports_each_change_once() {
        let version = Arc::new(AtomicU64::new(7));
        let source = version.clone();
        let check = VersionCheck::new(move || source.load(Ordering::SeqCst));

        version.store(8, Ordering::SeqCst);
        assert!(!check.is_valid());
        assert!(check.is_valid());
        assert_eq!(check.last_version(), 8);
    }
}
