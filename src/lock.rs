//! # Recursive Lock
//!
//! [`Lock`] wraps a kernel recursive mutex; [`ScopedLock`] is the RAII guard
//! that holds it. The guard is the supported way to use a lock: it releases
//! exactly once on every exit path, including early returns and unwinding.
//!
//! The kernel mutex applies priority inheritance, so a high-priority task
//! blocked on a lock raises the priority of the holder until it unlocks.

use core::marker::PhantomData;
use core::mem::ManuallyDrop;

use crate::error::{contract_violation, or_violation, Error, ObjectKind};
use crate::port::{Kernel, TickType, MAX_DELAY};

/// A recursive mutual-exclusion lock.
///
/// The same task may lock it repeatedly; it must unlock the same number of
/// times before another task can acquire it.
///
/// # Example
///
/// ```ignore
/// let lock = Lock::<FreeRtos>::new();
/// {
///     let _guard = lock.scoped();
///     // exclusive section
/// } // released here
/// ```
pub struct Lock<K: Kernel> {
    handle: ManuallyDrop<K::SemaphoreHandle>,
}

impl<K: Kernel> Lock<K> {
    /// Create a lock, reporting kernel allocation failure.
    pub fn try_new() -> Result<Self, Error> {
        debug_assert!(!K::in_isr(), "Lock created from interrupt context");
        let handle = K::recursive_mutex_create()
            .ok_or(Error::KernelObject(ObjectKind::RecursiveMutex))?;
        log::trace!("recursive mutex created");
        Ok(Self {
            handle: ManuallyDrop::new(handle),
        })
    }

    /// Create a lock. Allocation failure is a contract violation.
    #[track_caller]
    pub fn new() -> Self {
        or_violation(Self::try_new())
    }

    /// Try to acquire the lock, blocking the calling task for up to `ticks`.
    ///
    /// Returns whether the lock is now held by the caller. Must not be called
    /// from interrupt context (checked in debug builds).
    pub fn try_lock(&self, ticks: TickType) -> bool {
        debug_assert!(!K::in_isr(), "Lock::try_lock from interrupt context");
        K::recursive_mutex_take(&self.handle, ticks)
    }

    /// Acquire the lock, waiting as long as it takes.
    pub fn lock(&self) {
        while !self.try_lock(MAX_DELAY) {}
    }

    /// Release one level of ownership. Returns `false` if the caller does not
    /// hold the lock.
    pub fn try_unlock(&self) -> bool {
        K::recursive_mutex_give(&self.handle)
    }

    /// Release one level of ownership; the caller must hold the lock.
    #[track_caller]
    pub fn unlock(&self) {
        if !self.try_unlock() {
            contract_violation("Lock::unlock by a task that does not hold it");
        }
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn scoped(&self) -> ScopedLock<'_, K> {
        ScopedLock::new(self)
    }

    /// The kernel handle, for interop with raw kernel APIs.
    pub fn raw(&self) -> &K::SemaphoreHandle {
        &self.handle
    }
}

impl<K: Kernel> Default for Lock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Drop for Lock<K> {
    fn drop(&mut self) {
        // SAFETY: the handle is never used again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        K::semaphore_delete(handle);
    }
}

/// RAII guard for a held [`Lock`].
///
/// Locks on construction and unlocks exactly once when dropped. The guard is
/// `!Send`: the task that acquired the lock must release it, or priority
/// inheritance unwinds on the wrong task.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, K: Kernel> {
    lock: &'a Lock<K>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, K: Kernel> ScopedLock<'a, K> {
    pub fn new(lock: &'a Lock<K>) -> Self {
        lock.lock();
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<K: Kernel> Drop for ScopedLock<'_, K> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};
    use std::sync::Arc;
    use std::thread;

    fn held_elsewhere(lock: &Arc<Lock<Sim>>) -> bool {
        let lock = Arc::clone(lock);
        thread::spawn(move || {
            let acquired = lock.try_lock(0);
            if acquired {
                lock.unlock();
            }
            !acquired
        })
        .join()
        .unwrap()
    }

    #[test]
    fn test_reentrant_lock_needs_matching_unlocks() {
        let lock = Arc::new(Lock::<Sim>::new());
        for _ in 0..3 {
            assert!(lock.try_lock(0));
        }
        assert_eq!(lock.raw().depth(), 3);

        for remaining in (0..3).rev() {
            assert!(held_elsewhere(&lock));
            lock.unlock();
            assert_eq!(lock.raw().depth(), remaining);
        }
        assert!(!held_elsewhere(&lock));
    }

    #[test]
    fn test_try_unlock_without_ownership() {
        let lock = Lock::<Sim>::new();
        assert!(!lock.try_unlock());
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn test_unlock_without_ownership_halts() {
        Lock::<Sim>::new().unlock();
    }

    #[test]
    fn test_scoped_lock_releases_on_early_return() {
        fn first_even(lock: &Lock<Sim>, values: &[u32]) -> Option<u32> {
            let _guard = lock.scoped();
            for &value in values {
                if value % 2 == 0 {
                    return Some(value);
                }
            }
            None
        }

        let lock = Lock::<Sim>::new();
        assert_eq!(first_even(&lock, &[1, 4, 5]), Some(4));
        assert_eq!(lock.raw().depth(), 0);
        // Exactly one release: a further give has nothing to undo
        assert!(!lock.try_unlock());
    }

    #[test]
    fn test_scoped_lock_releases_on_unwind() {
        let lock = Arc::new(Lock::<Sim>::new());
        let inner = Arc::clone(&lock);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _outer = inner.scoped();
            let _nested = ScopedLock::new(&inner);
            panic!("unwinding while locked");
        }));
        assert!(result.is_err());
        assert_eq!(lock.raw().depth(), 0);
        assert!(!held_elsewhere(&lock));
    }

    #[test]
    fn test_lock_blocks_until_released() {
        let lock = Arc::new(Lock::<Sim>::new());
        let guard = lock.scoped();
        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let timed_out = !lock.try_lock(10);
                let _guard = lock.scoped();
                timed_out
            })
        };
        thread::sleep(core::time::Duration::from_millis(30));
        drop(guard);
        assert!(contender.join().unwrap());
    }

    #[test]
    fn test_drop_deletes_kernel_mutex() {
        let lock = Lock::<Sim>::new();
        let raw = Arc::clone(lock.raw());
        drop(lock);
        assert!(raw.is_deleted());
    }

    #[test]
    fn test_creation_failure_reported() {
        sim::fail_next_creates(1);
        assert_eq!(
            Lock::<Sim>::try_new().err(),
            Some(Error::KernelObject(ObjectKind::RecursiveMutex))
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "interrupt context")]
    fn test_lock_from_isr_rejected() {
        let lock = Lock::<Sim>::new();
        sim::interrupt(|| lock.try_lock(0));
    }
}
