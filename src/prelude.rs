pub use crate::builder::CacheBuilder;
pub use crate::cache::GenerationalCache;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{CacheError, ConfigError};
pub use crate::index::Index;
pub use crate::lock::{Continuity, DualModeLock, LockMode, ScopedLock};
#[cfg(feature = "metrics")]
pub use crate::metrics::{CacheMetricsSnapshot, MetricsExporter, PrometheusTextExporter};
pub use crate::ring::{CleanupReport, Maintenance};
pub use crate::traits::{Fallible, Loader, ValidityCheck, VersionCheck};
