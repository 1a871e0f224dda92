//! # Kernel Port Layer
//!
//! The boundary between taskkit and the real-time kernel underneath it.
//! Everything above this module talks to the kernel exclusively through the
//! [`Kernel`] trait, so the wrappers can run on FreeRTOS on the target and on
//! the simulated kernel under `cargo test`.
//!
//! The trait is a set of associated functions rather than methods: a kernel
//! is a process-wide facility, and every handle it issues is owned by exactly
//! one wrapper object. Handles are opaque to this layer.
//!
//! ## Ports
//!
//! | Port | Feature | Context probe | Critical section |
//! |------|---------|---------------|------------------|
//! | [`freertos::FreeRtos`] | `freertos` | `SCB::vect_active()` / `xPortInIsrContext` | `taskENTER_CRITICAL` |
//! | [`sim::Sim`] | `sim` (or tests) | per-thread flag | `critical_section::acquire` |

use core::ffi::c_void;

use crate::context::ContextProbe;

#[cfg(feature = "freertos")]
pub mod freertos;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Kernel tick count.
pub type TickType = u32;

/// Block indefinitely (`portMAX_DELAY`).
pub const MAX_DELAY: TickType = TickType::MAX;

/// Convert milliseconds to kernel ticks, rounding down like `pdMS_TO_TICKS`.
///
/// `u32::MAX` milliseconds means "wait forever" and maps to [`MAX_DELAY`];
/// durations too long to express in ticks saturate to it as well.
pub fn ms_to_ticks<K: Kernel>(ms: u32) -> TickType {
    if ms == u32::MAX {
        return MAX_DELAY;
    }
    let ticks = u64::from(ms) * u64::from(K::TICK_RATE_HZ) / 1000;
    TickType::try_from(ticks).unwrap_or(MAX_DELAY)
}

// ---------------------------------------------------------------------------
// Object parameters
// ---------------------------------------------------------------------------

/// Event group bit mask.
pub type EventBits = u32;

/// Task entry point handed to the kernel.
pub type TaskEntry = extern "C" fn(*mut c_void);

/// Where [`Kernel::queue_send`] places an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// Behind every queued item (FIFO).
    Back,
    /// Ahead of every queued item.
    Front,
}

/// Execution unit a task is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
    /// Let the kernel run the task on any core.
    Any,
    /// Pin the task to the given core. Single-core kernels ignore the index.
    Pinned(u8),
}

/// Parameters for [`Kernel::task_create`].
#[derive(Debug, Clone, Copy)]
pub struct TaskParams<'a> {
    pub name: &'a str,
    /// Stack size in the unit the kernel expects (bytes on ESP-IDF,
    /// words on vanilla FreeRTOS).
    pub stack_size: u32,
    pub priority: u8,
    pub core: Core,
}

// ---------------------------------------------------------------------------
// Kernel trait
// ---------------------------------------------------------------------------

/// The kernel services taskkit is built on.
///
/// Functions suffixed `_from_isr` are the interrupt-safe variants: they never
/// block, and a port requests a context switch on ISR exit when the call woke
/// a higher-priority task. Every other blocking function may only be called
/// from task context.
///
/// Raw item pointers passed to the queue functions must point to at least
/// `item_size` bytes, as given at creation.
pub trait Kernel: ContextProbe + 'static {
    type TaskHandle: Send + Sync;
    /// Shared by binary semaphores and recursive mutexes.
    type SemaphoreHandle: Send + Sync;
    type QueueHandle: Send + Sync;
    type EventGroupHandle: Send + Sync;
    /// State saved on critical-section entry and restored on exit.
    type CriticalState;

    /// Tick frequency, used to convert milliseconds.
    const TICK_RATE_HZ: u32;
    /// Number of usable low bits in an event group.
    const EVENT_BITS: u32;

    // --- Tasks ---
    fn task_create(
        entry: TaskEntry,
        arg: *mut c_void,
        params: &TaskParams<'_>,
    ) -> Option<Self::TaskHandle>;
    /// Deleting the calling task's own handle does not return.
    fn task_delete(task: Self::TaskHandle);
    fn task_suspend(task: &Self::TaskHandle);
    fn task_resume(task: &Self::TaskHandle);
    fn task_delay(ticks: TickType);

    // --- Binary semaphores ---
    fn binary_semaphore_create() -> Option<Self::SemaphoreHandle>;
    fn semaphore_take(sem: &Self::SemaphoreHandle, ticks: TickType) -> bool;
    fn semaphore_give(sem: &Self::SemaphoreHandle) -> bool;
    fn semaphore_give_from_isr(sem: &Self::SemaphoreHandle) -> bool;
    fn semaphore_delete(sem: Self::SemaphoreHandle);

    // --- Recursive mutexes ---
    fn recursive_mutex_create() -> Option<Self::SemaphoreHandle>;
    fn recursive_mutex_take(mutex: &Self::SemaphoreHandle, ticks: TickType) -> bool;
    fn recursive_mutex_give(mutex: &Self::SemaphoreHandle) -> bool;

    // --- Queues ---
    fn queue_create(length: usize, item_size: usize) -> Option<Self::QueueHandle>;
    /// # Safety
    /// `item` must be valid for reads of the queue's item size.
    unsafe fn queue_send(
        queue: &Self::QueueHandle,
        item: *const u8,
        ticks: TickType,
        position: QueuePosition,
    ) -> bool;
    /// # Safety
    /// `item` must be valid for reads of the queue's item size.
    unsafe fn queue_send_from_isr(
        queue: &Self::QueueHandle,
        item: *const u8,
        position: QueuePosition,
    ) -> bool;
    /// # Safety
    /// `out` must be valid for writes of the queue's item size.
    unsafe fn queue_receive(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool;
    /// # Safety
    /// `out` must be valid for writes of the queue's item size.
    unsafe fn queue_receive_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool;
    /// # Safety
    /// `out` must be valid for writes of the queue's item size.
    unsafe fn queue_peek(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool;
    /// # Safety
    /// `out` must be valid for writes of the queue's item size.
    unsafe fn queue_peek_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool;
    fn queue_messages_waiting(queue: &Self::QueueHandle) -> usize;
    fn queue_messages_waiting_from_isr(queue: &Self::QueueHandle) -> usize;
    fn queue_spaces_available(queue: &Self::QueueHandle) -> usize;
    fn queue_reset(queue: &Self::QueueHandle);
    fn queue_delete(queue: Self::QueueHandle);

    // --- Event groups ---
    fn event_group_create() -> Option<Self::EventGroupHandle>;
    /// Returns the group value when the wait condition was met (before any
    /// clear-on-exit), or the value at timeout.
    fn event_group_wait(
        group: &Self::EventGroupHandle,
        bits: EventBits,
        clear_on_exit: bool,
        wait_for_all: bool,
        ticks: TickType,
    ) -> EventBits;
    /// Returns the group value after the bits were set.
    fn event_group_set(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits;
    /// Returns whether the set request was accepted. Kernels may defer the
    /// actual update to a service task.
    fn event_group_set_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool;
    /// Returns the group value before the bits were cleared.
    fn event_group_clear(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits;
    /// Returns whether the clear request was accepted (may be deferred).
    fn event_group_clear_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool;
    fn event_group_get(group: &Self::EventGroupHandle) -> EventBits;
    fn event_group_get_from_isr(group: &Self::EventGroupHandle) -> EventBits;
    fn event_group_delete(group: Self::EventGroupHandle);

    // --- Critical sections ---
    /// Enter the kernel critical section.
    ///
    /// # Safety
    /// Must be paired with exactly one [`Kernel::critical_exit`] on the same
    /// task or ISR, in LIFO order with any nested sections.
    unsafe fn critical_enter() -> Self::CriticalState;
    /// # Safety
    /// `state` must come from the matching [`Kernel::critical_enter`].
    unsafe fn critical_exit(state: Self::CriticalState);
}
