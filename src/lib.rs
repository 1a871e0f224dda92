//! # taskkit: context-aware RTOS primitives
//!
//! RAII handles for the objects of a real-time kernel (tasks, recursive
//! mutexes, binary semaphores, bounded queues and event groups) for
//! microcontroller firmware.
//!
//! ## Overview
//!
//! Interrupt handlers and tasks reach the kernel through different entry
//! points: a semaphore given from an ISR must use the `FromISR` variant, and
//! calling the task variant there corrupts kernel state. Every operation in
//! this crate that has both variants asks the kernel port which context it
//! is running in and picks the right one:
//!
//! - **Give / set / clear / send / receive / peek / size** dispatch on
//!   context. From an ISR they never block and ignore any timeout.
//! - **Blocking acquires** (lock, take, wait, delay) are task-only and
//!   assert it in debug builds.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Application Tasks / ISRs                │
//! ├────────────────────────────────────────────────────────┤
//! │     Message Facades (message.rs)                        │
//! │     MessageProducer · MessageConsumer                   │
//! ├──────────────┬──────────────┬─────────────┬────────────┤
//! │  Task        │  Lock        │  Signal     │  EventSet  │
//! │  task.rs     │  lock.rs     │  signal.rs  │  event.rs  │
//! │  ─ start()   │  ─ scoped()  │  ─ take()   │  ─ wait_*()│
//! │  ─ stop()    │              │  ─ give()   │  ─ set()   │
//! │  ─ suspend() ├──────────────┴─────────────┴────────────┤
//! │              │     BoundedChannel (channel.rs)          │
//! ├──────────────┴─────────────────────────────────────────┤
//! │   CriticalSection (sync.rs) · Context (context.rs)      │
//! ├────────────────────────────────────────────────────────┤
//! │              Kernel trait (port/mod.rs)                 │
//! ├───────────────────────────┬────────────────────────────┤
//! │  port/freertos.rs         │  port/sim.rs               │
//! │  FreeRTOS via C shim      │  std threads (host tests)  │
//! └───────────────────────────┴────────────────────────────┘
//! ```
//!
//! ## Errors
//!
//! Timeouts are return values. Misuse that would leave the kernel in an
//! undefined state (double start, exhausted kernel heap, producing into no
//! queue) halts through [`error::contract_violation`]. See [`error`].
//!
//! ## Memory Model
//!
//! - **No `alloc`**: kernel objects live on the kernel heap, wrappers are
//!   plain values
//! - **One owner per handle**: each wrapper deletes its kernel object on drop
//! - **Pinned tasks**: the kernel holds a pointer to a started [`Task`]

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod lock;
pub mod message;
pub mod port;
pub mod signal;
pub mod sync;
pub mod task;

pub use channel::BoundedChannel;
pub use context::{Context, ContextProbe};
pub use error::{contract_violation, Error, ObjectKind};
pub use event::EventSet;
pub use lock::{Lock, ScopedLock};
pub use message::{MessageConsumer, MessageProducer};
pub use port::{ms_to_ticks, Core, EventBits, Kernel, TickType, MAX_DELAY};
pub use signal::Signal;
pub use sync::{critical_section, CriticalSection};
pub use task::{FnTask, Task, TaskBody, TaskConfig, TaskState};
