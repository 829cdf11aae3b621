//! gencache: a multi-index, age-bucketed cache for values fronting a slow
//! backing store.
//!
//! Values are looked up through named [`Index`]es, loaded on a miss, shared
//! as `Arc<V>`, and evicted a whole age bucket at a time once they are older
//! than `max_age` or the cache is over capacity and they are older than
//! `min_age`. An optional validity check flushes everything when the backing
//! store changes underneath the cache.
//!
//! See [`cache`] for an end-to-end example and [`ring`] for the eviction rules.

pub mod builder;
pub mod cache;
pub mod clock;
pub mod ds;
pub mod error;
pub mod index;
pub mod lock;
pub mod ring;
pub mod traits;

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod prelude;

pub use crate::builder::CacheBuilder;
pub use crate::cache::GenerationalCache;
pub use crate::error::{CacheError, ConfigError};
pub use crate::index::Index;
pub use crate::ring::{CleanupReport, Maintenance};
