//! Timed read/write lock with explicit upgrade and downgrade.
//!
//! Every index protects its entry map with a [`DualModeLock`]. All acquisitions
//! are bounded by a timeout; a timeout becomes
//! [`CacheError::LockTimeout`] instead of blocking forever.
//!
//! [`ScopedLock`] is a guard whose mode can be changed while it is alive:
//!
//! ```text
//!              acquire                 try_upgrade_for
//!   Unlocked ───────────► Upgradable ─────────────────► Write
//!      ▲                      │  ▲    downgrade_to_up.    │
//!      │ release              │  └──────────────────────┘ │
//!      │                      ▼ downgrade                 │ downgrade
//!      └──────────────────── Read ◄───────────────────────┘
//!
//!   Read ──► Write / Upgradable: released and re-acquired
//!            (Continuity::Broken, caller must re-check what it read)
//! ```
//!
//! Upgrades from `Upgradable` happen in place: no writer can slip in between
//! the read and the write. Plain `Read` guards cannot be upgraded atomically,
//! so that transition reports [`Continuity::Broken`].
//!
//! The lock is not reentrant; callers that already hold a guard pass it (or
//! the data behind it) down instead of locking again.

use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::error::CacheError;

/// Default time to wait for any cache lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Mode a [`ScopedLock`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Unlocked,
    Read,
    /// Shared with plain readers, exclusive among upgradable readers.
    Upgradable,
    Write,
}

/// Whether a mode change kept the protected data continuously locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// No other writer could have run during the transition.
    Preserved,
    /// The lock was released and re-acquired; anything read before the
    /// transition must be validated again.
    Broken,
}

/// Read/write lock whose acquisitions are bounded by a timeout.
#[derive(Debug)]
pub struct DualModeLock<T> {
    inner: RwLock<T>,
    resource: String,
    timeout: Duration,
}

impl<T> DualModeLock<T> {
    /// Creates a lock named `resource` (used in timeout errors).
    pub fn new(value: T, resource: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(value),
            resource: resource.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn timed_out(&self) -> CacheError {
        CacheError::lock_timeout(self.resource.clone(), self.timeout)
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>, CacheError> {
        self.inner
            .try_read_for(self.timeout)
            .ok_or_else(|| self.timed_out())
    }

    pub fn upgradable(&self) -> Result<RwLockUpgradableReadGuard<'_, T>, CacheError> {
        self.inner
            .try_upgradable_read_for(self.timeout)
            .ok_or_else(|| self.timed_out())
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>, CacheError> {
        self.inner
            .try_write_for(self.timeout)
            .ok_or_else(|| self.timed_out())
    }

    /// Upgrades in place. On timeout the upgradable guard is dropped.
    pub fn upgrade<'a>(
        &'a self,
        guard: RwLockUpgradableReadGuard<'a, T>,
    ) -> Result<RwLockWriteGuard<'a, T>, CacheError> {
        RwLockUpgradableReadGuard::try_upgrade_for(guard, self.timeout)
            .map_err(|_guard| self.timed_out())
    }

    /// Runs `f` under a read lock.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, CacheError> {
        let guard = self.read()?;
        Ok(f(&guard))
    }

    /// Runs `f` under a write lock.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, CacheError> {
        let mut guard = self.write()?;
        Ok(f(&mut guard))
    }

    /// Acquires a [`ScopedLock`] in `mode`.
    pub fn scoped(&self, mode: LockMode) -> Result<ScopedLock<'_, T>, CacheError> {
        let mut scoped = ScopedLock {
            lock: self,
            held: Held::Unlocked,
        };
        scoped.set_mode(mode)?;
        Ok(scoped)
    }
}

enum Held<'a, T> {
    Unlocked,
    Read(RwLockReadGuard<'a, T>),
    Upgradable(RwLockUpgradableReadGuard<'a, T>),
    Write(RwLockWriteGuard<'a, T>),
}

/// Guard over a [`DualModeLock`] that can move between modes.
///
/// Dropping the guard releases whatever it holds.
pub struct ScopedLock<'a, T> {
    lock: &'a DualModeLock<T>,
    held: Held<'a, T>,
}

impl<'a, T> ScopedLock<'a, T> {
    pub fn mode(&self) -> LockMode {
        match self.held {
            Held::Unlocked => LockMode::Unlocked,
            Held::Read(_) => LockMode::Read,
            Held::Upgradable(_) => LockMode::Upgradable,
            Held::Write(_) => LockMode::Write,
        }
    }

    /// Switches to `mode`.
    ///
    /// On a timeout the guard is left `Unlocked`, except for a failed
    /// `Upgradable -> Write` upgrade, which keeps the upgradable lock.
    pub fn set_mode(&mut self, mode: LockMode) -> Result<Continuity, CacheError> {
        let lock = self.lock;
        let held = std::mem::replace(&mut self.held, Held::Unlocked);
        let (held, continuity) = match (held, mode) {
            (held, LockMode::Unlocked) => {
                drop(held);
                (Held::Unlocked, Continuity::Preserved)
            },
            (Held::Unlocked, LockMode::Read) => (Held::Read(lock.read()?), Continuity::Preserved),
            (Held::Unlocked, LockMode::Upgradable) => {
                (Held::Upgradable(lock.upgradable()?), Continuity::Preserved)
            },
            (Held::Unlocked, LockMode::Write) => {
                (Held::Write(lock.write()?), Continuity::Preserved)
            },
            (held @ Held::Read(_), LockMode::Read) => (held, Continuity::Preserved),
            (Held::Read(guard), LockMode::Upgradable) => {
                drop(guard);
                (Held::Upgradable(lock.upgradable()?), Continuity::Broken)
            },
            (Held::Read(guard), LockMode::Write) => {
                drop(guard);
                (Held::Write(lock.write()?), Continuity::Broken)
            },
            (Held::Upgradable(guard), LockMode::Read) => (
                Held::Read(RwLockUpgradableReadGuard::downgrade(guard)),
                Continuity::Preserved,
            ),
            (held @ Held::Upgradable(_), LockMode::Upgradable) => (held, Continuity::Preserved),
            (Held::Upgradable(guard), LockMode::Write) => {
                match RwLockUpgradableReadGuard::try_upgrade_for(guard, lock.timeout) {
                    Ok(write) => (Held::Write(write), Continuity::Preserved),
                    Err(guard) => {
                        self.held = Held::Upgradable(guard);
                        return Err(lock.timed_out());
                    },
                }
            },
            (Held::Write(guard), LockMode::Read) => {
                (Held::Read(RwLockWriteGuard::downgrade(guard)), Continuity::Preserved)
            },
            (Held::Write(guard), LockMode::Upgradable) => (
                Held::Upgradable(RwLockWriteGuard::downgrade_to_upgradable(guard)),
                Continuity::Preserved,
            ),
            (held @ Held::Write(_), LockMode::Write) => (held, Continuity::Preserved),
        };
        self.held = held;
        Ok(continuity)
    }

    /// Shared access in any locked mode.
    pub fn get(&self) -> Option<&T> {
        match &self.held {
            Held::Unlocked => None,
            Held::Read(guard) => Some(&**guard),
            Held::Upgradable(guard) => Some(&**guard),
            Held::Write(guard) => Some(&**guard),
        }
    }

    /// Exclusive access; `None` unless the guard is in `Write` mode.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match &mut self.held {
            Held::Write(guard) => Some(&mut **guard),
            _ => None,
        }
    }
}

impl<T> std::fmt::Debug for ScopedLock<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock")
            .field("resource", &self.lock.resource)
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn lock(value: u32) -> DualModeLock<u32> {
        DualModeLock::new(value, "test", Duration::from_millis(20))
    }

    #[test]
    fn with_read_and_with_write() {
        let lock = lock(1);
        lock.with_write(|v| *v += 1).unwrap();
        assert_eq!(lock.with_read(|v| *v).unwrap(), 2);
    }

    #[test]
    fn write_times_out_while_read_held() {
        let lock = lock(0);
        let _reader = lock.read().unwrap();
        let err = lock.write().unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn upgradable_upgrades_in_place() {
        let lock = lock(7);
        let mut scoped = lock.scoped(LockMode::Upgradable).unwrap();
        assert_eq!(scoped.get(), Some(&7));
        assert!(scoped.get_mut().is_none());

        let continuity = scoped.set_mode(LockMode::Write).unwrap();
        assert_eq!(continuity, Continuity::Preserved);
        *scoped.get_mut().unwrap() = 8;

        scoped.set_mode(LockMode::Read).unwrap();
        assert_eq!(scoped.mode(), LockMode::Read);
        assert_eq!(scoped.get(), Some(&8));
    }

    #[test]
    fn read_to_write_reports_broken_continuity() {
        let lock = lock(0);
        let mut scoped = lock.scoped(LockMode::Read).unwrap();
        assert_eq!(scoped.set_mode(LockMode::Write).unwrap(), Continuity::Broken);
        assert_eq!(scoped.mode(), LockMode::Write);
    }

    #[test]
    fn failed_upgrade_keeps_upgradable_lock() {
        let lock = lock(0);
        let mut scoped = lock.scoped(LockMode::Upgradable).unwrap();
        let reader = lock.read().unwrap();

        assert!(scoped.set_mode(LockMode::Write).is_err());
        assert_eq!(scoped.mode(), LockMode::Upgradable);

        drop(reader);
        assert!(scoped.set_mode(LockMode::Write).is_ok());
    }

    #[test]
    fn downgrade_admits_other_readers() {
        let lock = Arc::new(DualModeLock::new(0u32, "shared", Duration::from_millis(200)));
        let mut scoped = lock.scoped(LockMode::Write).unwrap();
        *scoped.get_mut().unwrap() = 3;
        scoped.set_mode(LockMode::Read).unwrap();

        let other = lock.clone();
        let seen = thread::spawn(move || other.with_read(|v| *v))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn release_then_reacquire() {
        let lock = lock(0);
        let mut scoped = lock.scoped(LockMode::Write).unwrap();
        scoped.set_mode(LockMode::Unlocked).unwrap();
        assert!(scoped.get().is_none());
        assert!(lock.write().is_ok());
    }
}
