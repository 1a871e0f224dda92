//! # Event Set
//!
//! A kernel event group: a word of flags that tasks wait on and that tasks
//! and interrupts set and clear.
//!
//! Only the low [`Kernel::EVENT_BITS`] bits are usable; FreeRTOS with 32-bit
//! ticks reserves the top byte for itself. Debug builds reject masks that
//! reach into the reserved range.
//!
//! Values returned by [`EventSet::set_bits`], [`EventSet::clear_bits`] and
//! [`EventSet::bits`] are snapshots. Other tasks may change the group before
//! the caller looks at the result.

use core::mem::ManuallyDrop;

use crate::context::Context;
use crate::error::{or_violation, Error, ObjectKind};
use crate::port::{EventBits, Kernel, TickType};

/// A set of event flags.
///
/// # Example
///
/// ```ignore
/// const RX_DONE: EventBits = EventSet::<FreeRtos>::bit(0);
/// const TX_DONE: EventBits = EventSet::<FreeRtos>::bit(1);
///
/// let seen = events.wait_for_all(RX_DONE | TX_DONE, ms_to_ticks::<FreeRtos>(50), true);
/// if seen != RX_DONE | TX_DONE {
///     // timed out; `seen` holds whichever of the two arrived
/// }
/// ```
pub struct EventSet<K: Kernel> {
    handle: ManuallyDrop<K::EventGroupHandle>,
}

impl<K: Kernel> EventSet<K> {
    /// Create an event set with every bit clear.
    pub fn try_new() -> Result<Self, Error> {
        let handle =
            K::event_group_create().ok_or(Error::KernelObject(ObjectKind::EventGroup))?;
        log::trace!("event group created");
        Ok(Self {
            handle: ManuallyDrop::new(handle),
        })
    }

    #[track_caller]
    pub fn new() -> Self {
        or_violation(Self::try_new())
    }

    /// Mask with only bit `index` set.
    ///
    /// Evaluated in a `const` item, an index of 32 or more fails to compile.
    pub const fn bit(index: u32) -> EventBits {
        assert!(index < EventBits::BITS, "event bit index out of range");
        1 << index
    }

    #[track_caller]
    fn check_usable(bits: EventBits) {
        debug_assert!(
            bits.checked_shr(K::EVENT_BITS).unwrap_or(0) == 0,
            "event bits {:#x} reach into the kernel-reserved range",
            bits
        );
    }

    /// Block until at least one bit of `mask` is set, or `ticks` elapse.
    ///
    /// Returns the bits of `mask` that were set at wake time. Zero means the
    /// wait timed out, but a caller cannot tell that apart from a wake where
    /// the bits were cleared again before it was observed. With `auto_clear`
    /// the bits of `mask` are cleared on a successful wake.
    #[track_caller]
    pub fn wait_for_any(&self, mask: EventBits, ticks: TickType, auto_clear: bool) -> EventBits {
        debug_assert!(!K::in_isr(), "EventSet::wait_for_any from interrupt context");
        Self::check_usable(mask);
        K::event_group_wait(&self.handle, mask, auto_clear, false, ticks) & mask
    }

    /// Block until every bit of `mask` is set at once, or `ticks` elapse.
    ///
    /// Returns `mask` on success. On timeout it returns the subset of `mask`
    /// that was set at that moment, so compare the result against `mask`.
    /// With `auto_clear` the bits of `mask` are cleared on success only.
    #[track_caller]
    pub fn wait_for_all(&self, mask: EventBits, ticks: TickType, auto_clear: bool) -> EventBits {
        debug_assert!(!K::in_isr(), "EventSet::wait_for_all from interrupt context");
        Self::check_usable(mask);
        K::event_group_wait(&self.handle, mask, auto_clear, true, ticks) & mask
    }

    /// Set `bits`, waking any task whose wait condition is now met.
    ///
    /// Returns the group value after the set. From an ISR the kernel applies
    /// the update later, so the value is the current one with `bits` added,
    /// or just the current one if the kernel refused the request.
    #[track_caller]
    pub fn set_bits(&self, bits: EventBits) -> EventBits {
        Self::check_usable(bits);
        match Context::current::<K>() {
            Context::Interrupt => {
                let current = K::event_group_get_from_isr(&self.handle);
                if K::event_group_set_from_isr(&self.handle, bits) {
                    current | bits
                } else {
                    log::warn!("deferred event set of {:#x} refused", bits);
                    current
                }
            }
            Context::Task => K::event_group_set(&self.handle, bits),
        }
    }

    /// Clear `bits` and return the group value from before the clear.
    #[track_caller]
    pub fn clear_bits(&self, bits: EventBits) -> EventBits {
        Self::check_usable(bits);
        match Context::current::<K>() {
            Context::Interrupt => {
                let current = K::event_group_get_from_isr(&self.handle);
                if !K::event_group_clear_from_isr(&self.handle, bits) {
                    log::warn!("deferred event clear of {:#x} refused", bits);
                }
                current
            }
            Context::Task => K::event_group_clear(&self.handle, bits),
        }
    }

    /// Current group value.
    pub fn bits(&self) -> EventBits {
        match Context::current::<K>() {
            Context::Interrupt => K::event_group_get_from_isr(&self.handle),
            Context::Task => K::event_group_get(&self.handle),
        }
    }

    /// The kernel handle, for interop with raw kernel APIs.
    pub fn raw(&self) -> &K::EventGroupHandle {
        &self.handle
    }
}

impl<K: Kernel> Default for EventSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Drop for EventSet<K> {
    fn drop(&mut self) {
        // SAFETY: the handle is never used again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        K::event_group_delete(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};
    use crate::port::MAX_DELAY;
    use core::time::Duration;
    use std::sync::Arc;
    use std::thread;

    const A: EventBits = EventSet::<Sim>::bit(0);
    const B: EventBits = EventSet::<Sim>::bit(1);
    const C: EventBits = EventSet::<Sim>::bit(2);

    fn set_later(
        events: &Arc<EventSet<Sim>>,
        bits: EventBits,
        after_ms: u64,
    ) -> thread::JoinHandle<()> {
        let events = Arc::clone(events);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(after_ms));
            events.set_bits(bits);
        })
    }

    #[test]
    fn test_bit_helper() {
        assert_eq!(A, 0b001);
        assert_eq!(C, 0b100);
        assert_eq!(EventSet::<Sim>::bit(23), 0x0080_0000);
    }

    #[test]
    fn test_wait_for_all_needs_every_bit() {
        let events = Arc::new(EventSet::<Sim>::new());
        let first = set_later(&events, A, 5);
        let second = set_later(&events, B, 15);
        assert_eq!(events.wait_for_all(A | B, MAX_DELAY, false), A | B);
        first.join().unwrap();
        second.join().unwrap();
    }

    #[test]
    fn test_wait_for_all_returns_partial_on_timeout() {
        let events = EventSet::<Sim>::new();
        events.set_bits(A | C);
        let seen = events.wait_for_all(A | B, 10, true);
        assert_eq!(seen, A);
        assert_ne!(seen, A | B);
        // Nothing is cleared when the wait fails
        assert_eq!(events.bits(), A | C);
    }

    #[test]
    fn test_wait_for_any_returns_first_bit() {
        let events = Arc::new(EventSet::<Sim>::new());
        let setter = set_later(&events, B | C, 5);
        let seen = events.wait_for_any(A | B, MAX_DELAY, false);
        assert_eq!(seen, B);
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_for_any_times_out_with_zero() {
        let events = EventSet::<Sim>::new();
        events.set_bits(C);
        assert_eq!(events.wait_for_any(A | B, 5, true), 0);
    }

    #[test]
    fn test_auto_clear_only_clears_waited_bits() {
        let events = EventSet::<Sim>::new();
        events.set_bits(A | B | C);
        assert_eq!(events.wait_for_any(A | B, 0, true), A | B);
        assert_eq!(events.bits(), C);
        assert_eq!(events.wait_for_all(C, 0, false), C);
        assert_eq!(events.bits(), C);
    }

    #[test]
    fn test_set_and_clear_return_values() {
        let events = EventSet::<Sim>::new();
        assert_eq!(events.set_bits(A), A);
        assert_eq!(events.set_bits(B), A | B);
        assert_eq!(events.clear_bits(A), A | B);
        assert_eq!(events.bits(), B);
    }

    #[test]
    fn test_isr_set_and_clear() {
        let events = Arc::new(EventSet::<Sim>::new());
        let waiter = {
            let events = Arc::clone(&events);
            thread::spawn(move || events.wait_for_all(A | B, MAX_DELAY, false))
        };
        thread::sleep(Duration::from_millis(5));
        sim::interrupt(|| {
            assert_eq!(events.set_bits(A | B), A | B);
            assert_eq!(events.bits(), A | B);
        });
        assert_eq!(waiter.join().unwrap(), A | B);
        assert_eq!(sim::interrupt(|| events.clear_bits(A)), A | B);
        assert_eq!(events.bits(), B);
    }

    #[test]
    fn test_drop_deletes_kernel_group() {
        let events = EventSet::<Sim>::new();
        let raw = Arc::clone(events.raw());
        drop(events);
        assert!(raw.is_deleted());
    }

    #[test]
    fn test_creation_failure_reported() {
        sim::fail_next_creates(1);
        assert_eq!(
            EventSet::<Sim>::try_new().err(),
            Some(Error::KernelObject(ObjectKind::EventGroup))
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "kernel-reserved")]
    fn test_reserved_bits_rejected() {
        EventSet::<Sim>::new().set_bits(EventSet::<Sim>::bit(24));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "interrupt context")]
    fn test_wait_from_isr_rejected() {
        let events = EventSet::<Sim>::new();
        sim::interrupt(|| events.wait_for_any(A, 0, false));
    }
}
