//! # Bounded Channel
//!
//! A fixed-capacity kernel queue of `Copy` items. Items are copied in and out
//! by value, so a channel never hands out references into kernel memory.
//!
//! Every transfer is context-aware: from an ISR the non-blocking kernel entry
//! point is used and the timeout argument is ignored, since an interrupt
//! handler may never wait.

use core::marker::PhantomData;
use core::mem::{size_of, ManuallyDrop, MaybeUninit};

use crate::context::Context;
use crate::error::{or_violation, Error, ObjectKind};
use crate::port::{Kernel, QueuePosition, TickType};

/// A FIFO queue holding at most `N` items of type `T`.
///
/// # Example
///
/// ```ignore
/// let samples = BoundedChannel::<FreeRtos, u16, 8>::new();
///
/// // ADC conversion-complete interrupt
/// samples.send_back(&reading, 0);
///
/// // Filter task
/// while let Some(sample) = samples.receive(MAX_DELAY) {
///     filter.push(sample);
/// }
/// ```
pub struct BoundedChannel<K: Kernel, T: Copy, const N: usize> {
    handle: ManuallyDrop<K::QueueHandle>,
    _marker: PhantomData<T>,
}

// SAFETY: items are moved between tasks by value through the kernel, which
// serializes every access to the queue storage.
unsafe impl<K: Kernel, T: Copy + Send, const N: usize> Send for BoundedChannel<K, T, N> {}
unsafe impl<K: Kernel, T: Copy + Send, const N: usize> Sync for BoundedChannel<K, T, N> {}

impl<K: Kernel, T: Copy, const N: usize> BoundedChannel<K, T, N> {
    const NON_EMPTY: () = assert!(N > 0, "BoundedChannel capacity must be non-zero");

    /// Create a channel, reporting kernel allocation failure.
    pub fn try_new() -> Result<Self, Error> {
        let () = Self::NON_EMPTY;
        let handle =
            K::queue_create(N, size_of::<T>()).ok_or(Error::KernelObject(ObjectKind::Queue))?;
        log::trace!("queue created: {} x {} bytes", N, size_of::<T>());
        Ok(Self {
            handle: ManuallyDrop::new(handle),
            _marker: PhantomData,
        })
    }

    /// Create a channel. Allocation failure is a contract violation.
    #[track_caller]
    pub fn new() -> Self {
        or_violation(Self::try_new())
    }

    fn send(&self, item: &T, ticks: TickType, position: QueuePosition) -> bool {
        let item = (item as *const T).cast::<u8>();
        // SAFETY: `item` points to one `T`, the queue's item size.
        unsafe {
            match Context::current::<K>() {
                Context::Interrupt => K::queue_send_from_isr(&self.handle, item, position),
                Context::Task => K::queue_send(&self.handle, item, ticks, position),
            }
        }
    }

    /// Append `item`, waiting up to `ticks` for a free slot.
    ///
    /// Returns `false` if the channel was still full when the wait ended.
    pub fn send_back(&self, item: &T, ticks: TickType) -> bool {
        self.send(item, ticks, QueuePosition::Back)
    }

    /// Put `item` ahead of everything already queued, so it is the next one
    /// received.
    pub fn send_front(&self, item: &T, ticks: TickType) -> bool {
        self.send(item, ticks, QueuePosition::Front)
    }

    /// Remove and return the oldest item, waiting up to `ticks` for one.
    pub fn receive(&self, ticks: TickType) -> Option<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        let out = slot.as_mut_ptr().cast::<u8>();
        // SAFETY: `out` has room for one `T`, the queue's item size.
        let received = unsafe {
            match Context::current::<K>() {
                Context::Interrupt => K::queue_receive_from_isr(&self.handle, out),
                Context::Task => K::queue_receive(&self.handle, out, ticks),
            }
        };
        // SAFETY: the kernel copied a whole `T` into the slot.
        received.then(|| unsafe { slot.assume_init() })
    }

    /// Copy the oldest item without removing it.
    pub fn peek(&self, ticks: TickType) -> Option<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        let out = slot.as_mut_ptr().cast::<u8>();
        // SAFETY: `out` has room for one `T`, the queue's item size.
        let peeked = unsafe {
            match Context::current::<K>() {
                Context::Interrupt => K::queue_peek_from_isr(&self.handle, out),
                Context::Task => K::queue_peek(&self.handle, out, ticks),
            }
        };
        // SAFETY: the kernel copied a whole `T` into the slot.
        peeked.then(|| unsafe { slot.assume_init() })
    }

    /// Number of queued items.
    pub fn size(&self) -> usize {
        match Context::current::<K>() {
            Context::Interrupt => K::queue_messages_waiting_from_isr(&self.handle),
            Context::Task => K::queue_messages_waiting(&self.handle),
        }
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        match Context::current::<K>() {
            // No ISR-safe spaces query in the kernel
            Context::Interrupt => N - K::queue_messages_waiting_from_isr(&self.handle),
            Context::Task => K::queue_spaces_available(&self.handle),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Discard every queued item.
    ///
    /// Transfers racing with the reset may or may not be discarded.
    pub fn reset(&self) {
        K::queue_reset(&self.handle);
    }

    /// The kernel handle, for interop with raw kernel APIs.
    pub fn raw(&self) -> &K::QueueHandle {
        &self.handle
    }
}

impl<K: Kernel, T: Copy, const N: usize> Default for BoundedChannel<K, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel, T: Copy, const N: usize> Drop for BoundedChannel<K, T, N> {
    fn drop(&mut self) {
        // SAFETY: the handle is never used again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        K::queue_delete(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};
    use crate::port::MAX_DELAY;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Reading {
        channel: u8,
        millivolts: i32,
    }

    #[test]
    fn test_three_slot_scenario() {
        let chan = BoundedChannel::<Sim, i32, 3>::new();
        assert!(chan.send_back(&1, 0));
        assert!(chan.send_back(&2, 0));
        assert!(chan.send_back(&3, 0));
        assert!(!chan.send_back(&4, 0));
        assert!(chan.is_full());
        assert_eq!(chan.available(), 0);

        assert_eq!(chan.receive(0), Some(1));
        assert!(chan.send_back(&4, 0));
        assert_eq!(chan.size(), 3);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let chan = BoundedChannel::<Sim, u32, 16>::new();
        for value in 0..16 {
            assert!(chan.send_back(&value, 0));
        }
        let drained: Vec<u32> = core::iter::from_fn(|| chan.receive(0)).collect();
        assert_eq!(drained, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_front_jumps_queue() {
        let chan = BoundedChannel::<Sim, u8, 4>::new();
        chan.send_back(&1, 0);
        chan.send_back(&2, 0);
        chan.send_front(&9, 0);
        assert_eq!(chan.peek(0), Some(9));
        assert_eq!(chan.receive(0), Some(9));
        assert_eq!(chan.receive(0), Some(1));
    }

    #[test]
    fn test_peek_leaves_item() {
        let chan = BoundedChannel::<Sim, Reading, 2>::new();
        let reading = Reading {
            channel: 3,
            millivolts: -1200,
        };
        assert_eq!(chan.peek(0), None);
        chan.send_back(&reading, 0);
        assert_eq!(chan.peek(0), Some(reading));
        assert_eq!(chan.size(), 1);
        assert_eq!(chan.receive(0), Some(reading));
    }

    #[test]
    fn test_isr_transfers_never_block() {
        let chan = BoundedChannel::<Sim, u32, 1>::new();
        sim::interrupt(|| {
            assert_eq!(chan.receive(MAX_DELAY), None);
            assert!(chan.send_back(&7, MAX_DELAY));
            assert!(!chan.send_back(&8, MAX_DELAY));
            assert_eq!(chan.size(), 1);
            assert_eq!(chan.available(), 0);
            assert_eq!(chan.peek(MAX_DELAY), Some(7));
        });
        assert_eq!(chan.receive(0), Some(7));
    }

    #[test]
    fn test_isr_send_front() {
        let chan = BoundedChannel::<Sim, u32, 3>::new();
        chan.send_back(&1, 0);
        chan.send_back(&2, 0);
        sim::interrupt(|| {
            assert!(chan.send_front(&0, MAX_DELAY));
            assert!(chan.is_full());
            // Timeout ignored: fails at once
            assert!(!chan.send_front(&9, MAX_DELAY));
            assert_eq!(chan.peek(MAX_DELAY), Some(0));
        });
        assert_eq!(chan.receive(0), Some(0));
        assert_eq!(chan.receive(0), Some(1));
        assert_eq!(chan.receive(0), Some(2));
    }

    #[test]
    fn test_blocked_receiver_wakes_on_send() {
        let chan = Arc::new(BoundedChannel::<Sim, u64, 2>::new());
        let receiver = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || chan.receive(MAX_DELAY))
        };
        thread::sleep(core::time::Duration::from_millis(10));
        sim::interrupt(|| chan.send_back(&0xfeed, 0));
        assert_eq!(receiver.join().unwrap(), Some(0xfeed));
    }

    #[test]
    fn test_send_waits_for_space() {
        let chan = Arc::new(BoundedChannel::<Sim, u8, 1>::new());
        chan.send_back(&1, 0);
        let sender = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || chan.send_back(&2, MAX_DELAY))
        };
        thread::sleep(core::time::Duration::from_millis(10));
        assert_eq!(chan.receive(0), Some(1));
        assert!(sender.join().unwrap());
        assert_eq!(chan.receive(0), Some(2));
    }

    #[test]
    fn test_send_times_out_when_full() {
        let chan = BoundedChannel::<Sim, u8, 1>::new();
        chan.send_back(&1, 0);
        assert!(!chan.send_back(&2, 10));
        assert_eq!(chan.size(), 1);
    }

    #[test]
    fn test_reset_discards_items() {
        let chan = BoundedChannel::<Sim, u16, 4>::new();
        chan.send_back(&1, 0);
        chan.send_back(&2, 0);
        chan.reset();
        assert!(chan.is_empty());
        assert_eq!(chan.available(), chan.capacity());
    }

    #[test]
    fn test_drop_deletes_kernel_queue() {
        let chan = BoundedChannel::<Sim, u8, 2>::new();
        let raw = Arc::clone(chan.raw());
        drop(chan);
        assert!(raw.is_deleted());
    }

    #[test]
    fn test_creation_failure_reported() {
        sim::fail_next_creates(1);
        assert_eq!(
            BoundedChannel::<Sim, u8, 2>::try_new().err(),
            Some(Error::KernelObject(ObjectKind::Queue))
        );
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_creation_failure_halts() {
        sim::fail_next_creates(1);
        let _chan = BoundedChannel::<Sim, u8, 2>::new();
    }
}
