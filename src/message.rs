//! # Message Producer / Consumer
//!
//! Typed endpoints for task-to-task messaging. A [`MessageConsumer`] owns the
//! channel it reads from; any number of [`MessageProducer`]s point at it.
//! Timeouts are given in milliseconds.
//!
//! ```text
//!   ┌──────────────┐  produce()  ┌──────────────────────────┐  consume()
//!   │ Producer (n) │ ──────────► │ BoundedChannel (owned by │ ──────────►
//!   └──────────────┘             │ the consumer)            │
//!                                └──────────────────────────┘
//! ```

use crate::channel::BoundedChannel;
use crate::config::{
    DEFAULT_RX_QUEUE_SIZE, DEFAULT_RX_TIMEOUT_MS, DEFAULT_TX_QUEUE_SIZE, DEFAULT_TX_TIMEOUT_MS,
};
use crate::error::contract_violation;
use crate::port::{ms_to_ticks, Kernel};

/// The receiving end: owns a channel of up to `N` pending messages.
pub struct MessageConsumer<K: Kernel, T: Copy, const N: usize = { DEFAULT_RX_QUEUE_SIZE }> {
    incoming: BoundedChannel<K, T, N>,
}

impl<K: Kernel, T: Copy, const N: usize> MessageConsumer<K, T, N> {
    #[track_caller]
    pub fn new() -> Self {
        Self {
            incoming: BoundedChannel::new(),
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.incoming.is_empty()
    }

    /// Take the oldest message, waiting up to `timeout_ms` (`u32::MAX`
    /// waits forever).
    pub fn consume(&self, timeout_ms: u32) -> Option<T> {
        self.incoming.receive(ms_to_ticks::<K>(timeout_ms))
    }

    /// [`consume`](Self::consume) with [`DEFAULT_RX_TIMEOUT_MS`].
    pub fn consume_default(&self) -> Option<T> {
        self.consume(DEFAULT_RX_TIMEOUT_MS)
    }

    /// The channel producers should send to.
    pub fn incoming(&self) -> &BoundedChannel<K, T, N> {
        &self.incoming
    }
}

impl<K: Kernel, T: Copy, const N: usize> Default for MessageConsumer<K, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The sending end: feeds a channel it does not own.
pub struct MessageProducer<'a, K: Kernel, T: Copy, const N: usize = { DEFAULT_TX_QUEUE_SIZE }> {
    outgoing: Option<&'a BoundedChannel<K, T, N>>,
}

impl<'a, K: Kernel, T: Copy, const N: usize> MessageProducer<'a, K, T, N> {
    pub const fn new(outgoing: Option<&'a BoundedChannel<K, T, N>>) -> Self {
        Self { outgoing }
    }

    pub fn set_outgoing(&mut self, outgoing: &'a BoundedChannel<K, T, N>) {
        self.outgoing = Some(outgoing);
    }

    pub fn outgoing(&self) -> Option<&'a BoundedChannel<K, T, N>> {
        self.outgoing
    }

    /// Append `message` to the outgoing channel, waiting up to `timeout_ms`
    /// for space. Returns `false` if the channel stayed full.
    ///
    /// Producing before an outgoing channel is set is a contract violation.
    #[track_caller]
    pub fn produce(&self, message: &T, timeout_ms: u32) -> bool {
        match self.outgoing {
            Some(channel) => channel.send_back(message, ms_to_ticks::<K>(timeout_ms)),
            None => contract_violation("MessageProducer::produce without an outgoing channel"),
        }
    }

    /// [`produce`](Self::produce) with [`DEFAULT_TX_TIMEOUT_MS`].
    #[track_caller]
    pub fn produce_default(&self, message: &T) -> bool {
        self.produce(message, DEFAULT_TX_TIMEOUT_MS)
    }
}

impl<K: Kernel, T: Copy, const N: usize> Default for MessageProducer<'_, K, T, N> {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};
    use core::time::Duration;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Command {
        Start { speed: u16 },
        Stop,
    }

    #[test]
    fn test_round_trip_between_threads() {
        let consumer = Arc::new(MessageConsumer::<Sim, Command>::new());
        let sender = {
            let consumer = Arc::clone(&consumer);
            thread::spawn(move || {
                let producer = MessageProducer::new(Some(consumer.incoming()));
                for speed in 1..=20 {
                    assert!(producer.produce_default(&Command::Start { speed }));
                }
                assert!(producer.produce_default(&Command::Stop));
            })
        };

        let mut speeds = Vec::new();
        while let Some(command) = consumer.consume_default() {
            match command {
                Command::Start { speed } => speeds.push(speed),
                Command::Stop => break,
            }
        }
        sender.join().unwrap();
        assert_eq!(speeds, (1..=20).collect::<Vec<_>>());
        assert!(!consumer.has_messages());
    }

    #[test]
    fn test_produce_times_out_on_full_channel() {
        let consumer = MessageConsumer::<Sim, u8, 2>::new();
        let producer = MessageProducer::new(Some(consumer.incoming()));
        assert!(producer.produce(&1, 0));
        assert!(producer.produce(&2, 0));
        let start = Instant::now();
        assert!(!producer.produce(&3, 10));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_consume_times_out_on_empty_channel() {
        let consumer = MessageConsumer::<Sim, u32>::default();
        assert_eq!(consumer.consume(5), None);
        assert_eq!(consumer.incoming().capacity(), DEFAULT_RX_QUEUE_SIZE);
    }

    #[test]
    fn test_outgoing_can_be_set_later() {
        let consumer = MessageConsumer::<Sim, u32, 4>::new();
        let mut producer = MessageProducer::default();
        assert!(producer.outgoing().is_none());
        producer.set_outgoing(consumer.incoming());
        assert!(producer.outgoing().is_some());
        assert!(producer.produce(&7, 0));
        assert_eq!(consumer.consume(0), Some(7));
    }

    #[test]
    fn test_produce_from_interrupt() {
        let consumer = MessageConsumer::<Sim, u32, 1>::new();
        let producer = MessageProducer::new(Some(consumer.incoming()));
        sim::interrupt(|| {
            assert!(producer.produce_default(&1));
            // Full: the ISR path fails at once instead of waiting
            assert!(!producer.produce_default(&2));
            assert!(consumer.has_messages());
        });
        assert_eq!(consumer.consume(0), Some(1));
    }

    #[test]
    #[should_panic(expected = "without an outgoing channel")]
    fn test_produce_without_channel_halts() {
        let producer = MessageProducer::<Sim, u32>::new(None);
        producer.produce(&1, 0);
    }
}
