//! Builder for [`GenerationalCache`].
//!
//! Collects the capacity, age bounds, optional validity check, lock timeout
//! and clock, validates them, and builds the cache for a value type chosen at
//! `build` time.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use gencache::builder::CacheBuilder;
//!
//! let cache = CacheBuilder::new(500)
//!     .min_age(Duration::from_secs(30))
//!     .max_age(Duration::from_secs(10 * 60))
//!     .validity(|| true)
//!     .build::<String>();
//!
//! assert_eq!(cache.capacity(), 500);
//! assert_eq!(cache.time_slice(), Duration::from_millis(2_500));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::GenerationalCache;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::lock::DEFAULT_LOCK_TIMEOUT;
use crate::ring::{GenerationRing, RingConfig, MAX_AGE_CAP};
use crate::traits::ValidityCheck;

/// Default minimum age: five minutes.
pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(5 * 60);

/// Default maximum age: twenty minutes.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(20 * 60);

/// Builder for creating cache instances.
#[derive(Clone)]
pub struct CacheBuilder {
    capacity: usize,
    min_age: Duration,
    max_age: Duration,
    lock_timeout: Duration,
    validity: Option<Arc<dyn ValidityCheck>>,
    clock: Arc<dyn Clock>,
}

impl CacheBuilder {
    /// Create a new cache builder with the specified soft capacity.
    ///
    /// The cache may hold more than `capacity` values while they are younger
    /// than `min_age`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            min_age: DEFAULT_MIN_AGE,
            max_age: DEFAULT_MAX_AGE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            validity: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Values touched within `min_age` are never evicted for capacity.
    pub fn min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// Values not touched for `max_age` are evicted. Capped at twelve hours.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Check consulted at most once per time slice; `false` flushes the cache.
    pub fn validity(mut self, check: impl ValidityCheck + 'static) -> Self {
        self.validity = Some(Arc::new(check));
        self
    }

    /// How long any cache operation waits for a lock before failing.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Time source; tests use [`ManualClock`](crate::clock::ManualClock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> Result<RingConfig, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be greater than zero"));
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::new("lock_timeout must be greater than zero"));
        }
        let max_age = self.max_age.min(MAX_AGE_CAP);
        if max_age <= self.min_age {
            return Err(ConfigError::new(format!(
                "max_age ({:?}) must be greater than min_age ({:?})",
                max_age, self.min_age
            )));
        }
        Ok(RingConfig::new(self.capacity, self.min_age, self.max_age))
    }

    /// Build the cache, or return why the parameters are invalid.
    pub fn try_build<V>(self) -> Result<GenerationalCache<V>, ConfigError>
    where
        V: Send + Sync + 'static,
    {
        let config = self.validate()?;
        let ring = GenerationRing::new(config, self.clock, self.lock_timeout, self.validity);
        Ok(GenerationalCache::from_ring(ring))
    }

    /// Build the cache.
    ///
    /// # Panics
    ///
    /// Panics if the parameters are invalid; see [`try_build`](Self::try_build).
    pub fn build<V>(self) -> GenerationalCache<V>
    where
        V: Send + Sync + 'static,
    {
        match self.try_build() {
            Ok(cache) => cache,
            Err(err) => panic!("invalid cache configuration: {}", err),
        }
    }
}

impl fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("capacity", &self.capacity)
            .field("min_age", &self.min_age)
            .field("max_age", &self.max_age)
            .field("lock_timeout", &self.lock_timeout)
            .field("has_validity", &self.validity.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cache = CacheBuilder::new(100).build::<u32>();
        assert_eq!(cache.capacity(), 100);
        assert_eq!(cache.min_age(), DEFAULT_MIN_AGE);
        assert_eq!(cache.max_age(), DEFAULT_MAX_AGE);
        assert_eq!(cache.time_slice(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let zero = CacheBuilder::new(0).try_build::<u32>().unwrap_err();
        assert!(zero.message().contains("capacity"));

        let ages = CacheBuilder::new(1)
            .min_age(Duration::from_secs(10))
            .max_age(Duration::from_secs(10))
            .try_build::<u32>()
            .unwrap_err();
        assert!(ages.message().contains("max_age"));

        let timeout = CacheBuilder::new(1)
            .lock_timeout(Duration::ZERO)
            .try_build::<u32>();
        assert!(timeout.is_err());
    }

    #[test]
    fn max_age_is_capped_before_validation() {
        let day = Duration::from_secs(24 * 60 * 60);
        let cache = CacheBuilder::new(1)
            .min_age(Duration::from_secs(60))
            .max_age(day)
            .build::<u32>();
        assert_eq!(cache.max_age(), MAX_AGE_CAP);

        let result = CacheBuilder::new(1)
            .min_age(MAX_AGE_CAP)
            .max_age(day)
            .try_build::<u32>();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid cache configuration")]
    fn build_panics_on_invalid_parameters() {
        let _ = CacheBuilder::new(0).build::<u32>();
    }

    #[test]
    fn builder_is_reusable() {
        let builder = CacheBuilder::new(8).min_age(Duration::ZERO);
        let a = builder.clone().build::<u32>();
        let b = builder.build::<String>();
        assert_eq!(a.capacity(), b.capacity());
    }
}
