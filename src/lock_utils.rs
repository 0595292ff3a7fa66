//! Poison-tolerant lock acquisition.
//!
//! A panic on one switch's event path must not take the other switches down
//! with it. These helpers log the poisoning at ERROR level and hand back the
//! inner guard so the controller keeps forwarding with whatever state the
//! panicking thread left behind.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Lock a Mutex, recovering the guard if a previous holder panicked.
///
/// `context` names what the lock protects and only appears in the log line.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("Mutex poisoned for '{}' - continuing with recovered state", context);
        poisoned.into_inner()
    })
}

/// Read-lock a RwLock, recovering the guard if a writer panicked.
pub fn read_lock_or_recover<'a, T>(rwlock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    rwlock.read().unwrap_or_else(|poisoned| {
        error!("RwLock (read) poisoned for '{}' - continuing with recovered state", context);
        poisoned.into_inner()
    })
}

/// Write-lock a RwLock, recovering the guard if a writer panicked.
pub fn write_lock_or_recover<'a, T>(
    rwlock: &'a RwLock<T>,
    context: &str,
) -> RwLockWriteGuard<'a, T> {
    rwlock.write().unwrap_or_else(|poisoned| {
        error!("RwLock (write) poisoned for '{}' - continuing with recovered state", context);
        poisoned.into_inner()
    })
}
