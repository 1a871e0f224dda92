//! # taskkit Configuration
//!
//! Compile-time defaults for tasks and the message facades. Kernel-side
//! limits (heap size, number of priorities, tick rate) live in the kernel's
//! own configuration; the constants here must agree with it where noted.

use crate::port::Core;

/// Default task stack size, in the unit the kernel expects (bytes on ESP-IDF,
/// words on vanilla FreeRTOS). Matches `configMINIMAL_STACK_SIZE` of the
/// reference firmware.
pub const MINIMAL_STACK_SIZE: u32 = 1024;

/// Default task priority. Priority 0 is reserved for the kernel idle task.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Default execution unit for new tasks.
pub const DEFAULT_CORE: Core = Core::Pinned(0);

/// Default task name.
pub const DEFAULT_TASK_NAME: &str = "Task";

/// Default name of closure-driven tasks.
pub const DEFAULT_FN_TASK_NAME: &str = "FnTask";

/// Maximum task name length, excluding the terminator. Must not exceed
/// `configMAX_TASK_NAME_LEN - 1`; longer names are truncated.
pub const MAX_TASK_NAME_LEN: usize = 15;

/// Tick frequency of the FreeRTOS build. Must equal `configTICK_RATE_HZ`.
pub const FREERTOS_TICK_RATE_HZ: u32 = 1000;

/// Usable event group bits on FreeRTOS with 32-bit ticks
/// (`configUSE_16_BIT_TICKS == 0`); the top byte is kernel-reserved.
pub const FREERTOS_EVENT_BITS: u32 = 24;

/// Default depth of a [`MessageConsumer`](crate::message::MessageConsumer) queue.
pub const DEFAULT_RX_QUEUE_SIZE: usize = 10;

/// Default depth of the queue a [`MessageProducer`](crate::message::MessageProducer) feeds.
pub const DEFAULT_TX_QUEUE_SIZE: usize = 10;

/// Default consumer wait in milliseconds: forever.
pub const DEFAULT_RX_TIMEOUT_MS: u32 = u32::MAX;

/// Default producer wait in milliseconds for queue space.
pub const DEFAULT_TX_TIMEOUT_MS: u32 = 100;
