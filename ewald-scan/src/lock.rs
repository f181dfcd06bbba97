//! Shared file lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Serializes writes to one backing store.
///
/// Owned by a [`crate::Sphere`] and handed to every arch it holds, so arch
/// and sphere persistence never interleave on the same store. Clones share
/// the same lock.
#[derive(Clone, Debug, Default)]
pub struct FileLock(Arc<Mutex<()>>);

impl FileLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if both handles guard the same store.
    #[must_use]
    pub fn is_shared_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share() {
        let a = FileLock::new();
        let b = a.clone();
        assert!(a.is_shared_with(&b));
        assert!(!a.is_shared_with(&FileLock::new()));

        let guard = a.lock();
        assert!(b.0.try_lock().is_err());
        drop(guard);
        assert!(b.0.try_lock().is_ok());
    }
}
