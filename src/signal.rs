//! # Signal
//!
//! A binary semaphore used as a one-slot handoff: one side waits with
//! [`Signal::take`], the other announces with [`Signal::give`]. ISR code must
//! never block, so only the give side is context-aware; taking is a
//! task-context operation.

use core::mem::ManuallyDrop;

use crate::context::Context;
use crate::error::{contract_violation, or_violation, Error, ObjectKind};
use crate::port::{ms_to_ticks, Kernel, MAX_DELAY};

/// A binary semaphore that can be given from tasks and interrupts.
///
/// Created in the "not given" state. A give while already given is refused:
/// [`try_give`](Signal::try_give) returns `false` and the signal stays given
/// (one pending wake-up, never more).
///
/// # Example
///
/// ```ignore
/// let data_ready: &'static Signal<FreeRtos> = cortex_m::singleton!(: Signal<FreeRtos> = Signal::new()).unwrap();
///
/// // In the UART interrupt handler
/// data_ready.try_give();
///
/// // In the consumer task
/// data_ready.take();
/// ```
pub struct Signal<K: Kernel> {
    handle: ManuallyDrop<K::SemaphoreHandle>,
}

impl<K: Kernel> Signal<K> {
    /// Create a signal, reporting kernel allocation failure.
    pub fn try_new() -> Result<Self, Error> {
        let handle = K::binary_semaphore_create()
            .ok_or(Error::KernelObject(ObjectKind::BinarySemaphore))?;
        log::trace!("binary semaphore created");
        Ok(Self {
            handle: ManuallyDrop::new(handle),
        })
    }

    /// Create a signal. Allocation failure is a contract violation.
    #[track_caller]
    pub fn new() -> Self {
        or_violation(Self::try_new())
    }

    /// Wait up to `timeout_ms` milliseconds for the signal and consume it.
    ///
    /// `u32::MAX` waits forever. Task context only (checked in debug builds).
    pub fn try_take(&self, timeout_ms: u32) -> bool {
        debug_assert!(!K::in_isr(), "Signal::try_take from interrupt context");
        K::semaphore_take(&self.handle, ms_to_ticks::<K>(timeout_ms))
    }

    /// Wait for the signal and consume it.
    pub fn take(&self) {
        debug_assert!(!K::in_isr(), "Signal::take from interrupt context");
        while !K::semaphore_take(&self.handle, MAX_DELAY) {}
    }

    /// Give the signal from any context.
    ///
    /// Returns whether the kernel accepted it; `false` means it was already
    /// given. From an ISR, a context switch is requested on exit if the give
    /// woke a higher-priority task.
    pub fn try_give(&self) -> bool {
        match Context::current::<K>() {
            Context::Interrupt => K::semaphore_give_from_isr(&self.handle),
            Context::Task => K::semaphore_give(&self.handle),
        }
    }

    /// Give a signal that is known not to be pending.
    #[track_caller]
    pub fn give(&self) {
        if !self.try_give() {
            contract_violation("Signal::give on a signal that is already given");
        }
    }

    /// The kernel handle, for interop with raw kernel APIs.
    pub fn raw(&self) -> &K::SemaphoreHandle {
        &self.handle
    }
}

impl<K: Kernel> Default for Signal<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Drop for Signal<K> {
    fn drop(&mut self) {
        // SAFETY: the handle is never used again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        K::semaphore_delete(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_handoff_once() {
        let signal = Signal::<Sim>::new();
        assert!(!signal.try_take(0));
        signal.give();
        assert!(signal.try_take(0));
        assert!(!signal.try_take(0));
    }

    #[test]
    fn test_give_while_given_is_refused() {
        let signal = Signal::<Sim>::new();
        assert!(signal.try_give());
        assert!(!signal.try_give());
        // Still exactly one pending take
        assert!(signal.try_take(0));
        assert!(!signal.try_take(0));
    }

    #[test]
    #[should_panic(expected = "already given")]
    fn test_give_while_given_halts() {
        let signal = Signal::<Sim>::new();
        signal.give();
        signal.give();
    }

    #[test]
    fn test_give_from_interrupt() {
        let signal = Signal::<Sim>::new();
        assert!(sim::interrupt(|| signal.try_give()));
        assert!(!sim::interrupt(|| signal.try_give()));
        assert!(signal.try_take(0));
    }

    #[test]
    fn test_take_wakes_on_give_from_other_thread() {
        let signal = Arc::new(Signal::<Sim>::new());
        let giver = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(core::time::Duration::from_millis(10));
                sim::interrupt(|| signal.give());
            })
        };
        signal.take();
        giver.join().unwrap();
        assert!(!signal.try_take(0));
    }

    #[test]
    fn test_take_times_out() {
        let signal = Signal::<Sim>::new();
        let start = std::time::Instant::now();
        assert!(!signal.try_take(20));
        assert!(start.elapsed() >= core::time::Duration::from_millis(20));
    }

    #[test]
    fn test_drop_deletes_kernel_semaphore() {
        let signal = Signal::<Sim>::new();
        let raw = Arc::clone(signal.raw());
        drop(signal);
        assert!(raw.is_deleted());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "interrupt context")]
    fn test_take_from_isr_rejected() {
        let signal = Signal::<Sim>::new();
        sim::interrupt(|| signal.try_take(0));
    }
}
