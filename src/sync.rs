//! # Critical Sections
//!
//! Scoped exclusion from every other task and from interrupts at or below the
//! kernel's syscall priority. Used by [`Task`](crate::task::Task) to update
//! its lifecycle flags without a scheduler tick observing a torn state.
//!
//! ## Nesting
//!
//! Whether critical sections nest is decided by the kernel port, not by this
//! module:
//! - FreeRTOS keeps a per-task nesting counter; interrupts are re-enabled
//!   when the outermost section exits. On SMP ports (ESP-IDF) the section
//!   also takes a spinlock shared by both cores.
//! - The simulated kernel uses the `critical-section` crate's reentrant
//!   global lock.
//!
//! Code that must run on other kernels should not rely on nesting.
//!
//! A critical section must never be held across a blocking kernel call:
//! the scheduler cannot switch away from a task that masked it out.

use core::marker::PhantomData;

use crate::port::Kernel;

/// RAII guard for the kernel critical section.
///
/// Entered by [`CriticalSection::enter`], exited when dropped, including
/// while unwinding. The guard is `!Send`: it must be released by the task
/// or ISR that entered it.
///
/// # Usage
/// ```ignore
/// let _cs = CriticalSection::<FreeRtos>::enter();
/// // short, non-blocking update of shared state
/// ```
#[must_use = "the critical section exits as soon as the guard is dropped"]
pub struct CriticalSection<K: Kernel> {
    state: Option<K::CriticalState>,
    _not_send: PhantomData<*const ()>,
}

impl<K: Kernel> CriticalSection<K> {
    /// Enter the kernel critical section.
    #[inline]
    pub fn enter() -> Self {
        // SAFETY: exited exactly once, by `Drop`, on the same context.
        let state = unsafe { K::critical_enter() };
        Self {
            state: Some(state),
            _not_send: PhantomData,
        }
    }
}

impl<K: Kernel> Drop for CriticalSection<K> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            // SAFETY: `state` was returned by the matching `critical_enter`.
            unsafe { K::critical_exit(state) };
        }
    }
}

/// Execute a closure within a critical section.
///
/// The closure receives the guard so helpers can demand proof that they run
/// inside one.
///
/// # Usage
/// ```ignore
/// sync::critical_section::<FreeRtos, _, _>(|_cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<K, F, R>(f: F) -> R
where
    K: Kernel,
    F: FnOnce(&CriticalSection<K>) -> R,
{
    let cs = CriticalSection::<K>::enter();
    f(&cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::Sim;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_critical_section_excludes_other_threads() {
        let counter = Arc::new(AtomicU32::new(0));
        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..200 {
                        critical_section::<Sim, _, _>(|_cs| {
                            // Non-atomic read-modify-write made safe by the section
                            let value = counter.load(Ordering::Relaxed);
                            counter.store(value + 1, Ordering::Relaxed);
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 800);
    }

    #[test]
    fn test_critical_section_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _cs = CriticalSection::<Sim>::enter();
            panic!("inside critical section");
        });
        assert!(result.is_err());
        // Another thread can still enter, so the section was exited
        thread::spawn(|| critical_section::<Sim, _, _>(|_cs| ()))
            .join()
            .unwrap();
    }

    #[test]
    fn test_nested_sections_on_sim() {
        let value = critical_section::<Sim, _, _>(|_outer| {
            critical_section::<Sim, _, _>(|_inner| 7)
        });
        assert_eq!(value, 7);
    }
}
