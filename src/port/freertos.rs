//! # FreeRTOS Port
//!
//! Binds [`Kernel`] to a FreeRTOS kernel linked into the firmware. Most of
//! the FreeRTOS API is macros, so the calls go through a small C shim
//! (`shim/taskkit_shim.c`) that exports each one as a `taskkit_*` function.
//!
//! Interrupt context on Cortex-M is read from the IPSR register; other
//! targets ask the shim, which wraps `xPortInIsrContext`.
//!
//! Every `*_from_isr` call passes a "higher priority task woken" flag to the
//! kernel and requests a context switch on ISR exit when it is set.

use core::ffi::{c_char, c_void};
use core::ptr::{self, NonNull};

use super::{Core, EventBits, Kernel, QueuePosition, TaskEntry, TaskParams, TickType};
use crate::config::{FREERTOS_EVENT_BITS, FREERTOS_TICK_RATE_HZ, MAX_TASK_NAME_LEN};
use crate::context::ContextProbe;

/// `tskNO_AFFINITY` on ESP-IDF; ignored by single-core ports.
const NO_AFFINITY: i32 = 0x7FFF_FFFF;

const PD_TRUE: i32 = 1;

// ---------------------------------------------------------------------------
// Shim bindings
// ---------------------------------------------------------------------------

extern "C" {
    #[cfg(not(target_arch = "arm"))]
    fn taskkit_in_isr() -> i32;

    fn taskkit_task_create(
        entry: TaskEntry,
        name: *const c_char,
        stack_size: u32,
        arg: *mut c_void,
        priority: u32,
        core: i32,
        handle: *mut *mut c_void,
    ) -> i32;
    fn taskkit_task_delete(task: *mut c_void);
    fn taskkit_task_suspend(task: *mut c_void);
    fn taskkit_task_resume(task: *mut c_void);
    fn taskkit_task_delay(ticks: TickType);

    fn taskkit_semaphore_create_binary() -> *mut c_void;
    fn taskkit_semaphore_take(sem: *mut c_void, ticks: TickType) -> i32;
    fn taskkit_semaphore_give(sem: *mut c_void) -> i32;
    fn taskkit_semaphore_give_from_isr(sem: *mut c_void, woken: *mut i32) -> i32;
    fn taskkit_semaphore_delete(sem: *mut c_void);

    fn taskkit_recursive_mutex_create() -> *mut c_void;
    fn taskkit_recursive_mutex_take(mutex: *mut c_void, ticks: TickType) -> i32;
    fn taskkit_recursive_mutex_give(mutex: *mut c_void) -> i32;

    fn taskkit_queue_create(length: u32, item_size: u32) -> *mut c_void;
    fn taskkit_queue_send(queue: *mut c_void, item: *const c_void, ticks: TickType, front: i32)
        -> i32;
    fn taskkit_queue_send_from_isr(
        queue: *mut c_void,
        item: *const c_void,
        front: i32,
        woken: *mut i32,
    ) -> i32;
    fn taskkit_queue_receive(queue: *mut c_void, out: *mut c_void, ticks: TickType) -> i32;
    fn taskkit_queue_receive_from_isr(queue: *mut c_void, out: *mut c_void, woken: *mut i32)
        -> i32;
    fn taskkit_queue_peek(queue: *mut c_void, out: *mut c_void, ticks: TickType) -> i32;
    fn taskkit_queue_peek_from_isr(queue: *mut c_void, out: *mut c_void) -> i32;
    fn taskkit_queue_messages_waiting(queue: *mut c_void) -> u32;
    fn taskkit_queue_messages_waiting_from_isr(queue: *mut c_void) -> u32;
    fn taskkit_queue_spaces_available(queue: *mut c_void) -> u32;
    fn taskkit_queue_reset(queue: *mut c_void);
    fn taskkit_queue_delete(queue: *mut c_void);

    fn taskkit_event_group_create() -> *mut c_void;
    fn taskkit_event_group_wait(
        group: *mut c_void,
        bits: EventBits,
        clear_on_exit: i32,
        wait_for_all: i32,
        ticks: TickType,
    ) -> EventBits;
    fn taskkit_event_group_set(group: *mut c_void, bits: EventBits) -> EventBits;
    fn taskkit_event_group_set_from_isr(group: *mut c_void, bits: EventBits, woken: *mut i32)
        -> i32;
    fn taskkit_event_group_clear(group: *mut c_void, bits: EventBits) -> EventBits;
    fn taskkit_event_group_clear_from_isr(group: *mut c_void, bits: EventBits) -> i32;
    fn taskkit_event_group_get(group: *mut c_void) -> EventBits;
    fn taskkit_event_group_get_from_isr(group: *mut c_void) -> EventBits;
    fn taskkit_event_group_delete(group: *mut c_void);

    fn taskkit_enter_critical() -> u32;
    fn taskkit_exit_critical(state: u32);
    fn taskkit_yield_from_isr(woken: i32);
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

macro_rules! kernel_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(NonNull<c_void>);

        // SAFETY: FreeRTOS handles are usable from any task; the kernel
        // serializes access to the object behind them.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            fn from_raw(raw: *mut c_void) -> Option<Self> {
                NonNull::new(raw).map(Self)
            }

            /// The raw `*Handle_t`, for calling FreeRTOS directly.
            pub fn as_ptr(&self) -> *mut c_void {
                self.0.as_ptr()
            }
        }
    };
}

kernel_handle!(
    /// A `TaskHandle_t`.
    TaskHandle
);
kernel_handle!(
    /// A `SemaphoreHandle_t`, binary or recursive mutex.
    SemaphoreHandle
);
kernel_handle!(
    /// A `QueueHandle_t`.
    QueueHandle
);
kernel_handle!(
    /// An `EventGroupHandle_t`.
    EventGroupHandle
);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run an ISR-variant call and request a context switch if it woke a task.
fn from_isr<R>(f: impl FnOnce(*mut i32) -> R) -> R {
    let mut woken: i32 = 0;
    let result = f(&mut woken as *mut i32);
    // SAFETY: called from the ISR that made the kernel call.
    unsafe { taskkit_yield_from_isr(woken) };
    result
}

/// NUL-terminated copy of a task name, cut to the kernel's limit.
/// `name` comes from `TaskConfig`, already cut on a character boundary.
fn c_name(name: &str) -> [u8; MAX_TASK_NAME_LEN + 1] {
    debug_assert!(
        name.len() <= MAX_TASK_NAME_LEN,
        "task name {:?} longer than {} bytes",
        name,
        MAX_TASK_NAME_LEN
    );
    let mut buf = [0; MAX_TASK_NAME_LEN + 1];
    let len = name.len().min(MAX_TASK_NAME_LEN);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

fn affinity(core: Core) -> i32 {
    match core {
        Core::Any => NO_AFFINITY,
        Core::Pinned(index) => i32::from(index),
    }
}

fn front_flag(position: QueuePosition) -> i32 {
    i32::from(position == QueuePosition::Front)
}

// ---------------------------------------------------------------------------
// Kernel implementation
// ---------------------------------------------------------------------------

/// The FreeRTOS kernel.
pub struct FreeRtos;

impl ContextProbe for FreeRtos {
    #[cfg(target_arch = "arm")]
    fn in_isr() -> bool {
        use cortex_m::peripheral::scb::VectActive;
        use cortex_m::peripheral::SCB;

        SCB::vect_active() != VectActive::ThreadMode
    }

    #[cfg(not(target_arch = "arm"))]
    fn in_isr() -> bool {
        // SAFETY: pure query of the port's interrupt nesting state.
        unsafe { taskkit_in_isr() != 0 }
    }
}

impl Kernel for FreeRtos {
    type TaskHandle = TaskHandle;
    type SemaphoreHandle = SemaphoreHandle;
    type QueueHandle = QueueHandle;
    type EventGroupHandle = EventGroupHandle;
    type CriticalState = u32;

    const TICK_RATE_HZ: u32 = FREERTOS_TICK_RATE_HZ;
    const EVENT_BITS: u32 = FREERTOS_EVENT_BITS;

    fn task_create(
        entry: TaskEntry,
        arg: *mut c_void,
        params: &TaskParams<'_>,
    ) -> Option<Self::TaskHandle> {
        let name = c_name(params.name);
        let mut raw = ptr::null_mut();
        // SAFETY: `name` is NUL-terminated and copied by the kernel; `arg`
        // is handed to `entry` unchanged.
        let created = unsafe {
            taskkit_task_create(
                entry,
                name.as_ptr().cast(),
                params.stack_size,
                arg,
                u32::from(params.priority),
                affinity(params.core),
                &mut raw,
            )
        };
        if created == PD_TRUE {
            TaskHandle::from_raw(raw)
        } else {
            None
        }
    }

    fn task_delete(task: Self::TaskHandle) {
        // SAFETY: the handle is live and owned by the caller.
        unsafe { taskkit_task_delete(task.as_ptr()) }
    }

    fn task_suspend(task: &Self::TaskHandle) {
        // SAFETY: the handle is live.
        unsafe { taskkit_task_suspend(task.as_ptr()) }
    }

    fn task_resume(task: &Self::TaskHandle) {
        // SAFETY: the handle is live.
        unsafe { taskkit_task_resume(task.as_ptr()) }
    }

    fn task_delay(ticks: TickType) {
        // SAFETY: task context, checked by the caller.
        unsafe { taskkit_task_delay(ticks) }
    }

    fn binary_semaphore_create() -> Option<Self::SemaphoreHandle> {
        // SAFETY: allocates from the kernel heap; null on failure.
        SemaphoreHandle::from_raw(unsafe { taskkit_semaphore_create_binary() })
    }

    fn semaphore_take(sem: &Self::SemaphoreHandle, ticks: TickType) -> bool {
        // SAFETY: the handle is live.
        unsafe { taskkit_semaphore_take(sem.as_ptr(), ticks) == PD_TRUE }
    }

    fn semaphore_give(sem: &Self::SemaphoreHandle) -> bool {
        // SAFETY: the handle is live.
        unsafe { taskkit_semaphore_give(sem.as_ptr()) == PD_TRUE }
    }

    fn semaphore_give_from_isr(sem: &Self::SemaphoreHandle) -> bool {
        // SAFETY: the handle is live; `woken` outlives the call.
        from_isr(|woken| unsafe { taskkit_semaphore_give_from_isr(sem.as_ptr(), woken) })
            == PD_TRUE
    }

    fn semaphore_delete(sem: Self::SemaphoreHandle) {
        // SAFETY: the handle is live and owned by the caller.
        unsafe { taskkit_semaphore_delete(sem.as_ptr()) }
    }

    fn recursive_mutex_create() -> Option<Self::SemaphoreHandle> {
        // SAFETY: allocates from the kernel heap; null on failure.
        SemaphoreHandle::from_raw(unsafe { taskkit_recursive_mutex_create() })
    }

    fn recursive_mutex_take(mutex: &Self::SemaphoreHandle, ticks: TickType) -> bool {
        // SAFETY: the handle is live.
        unsafe { taskkit_recursive_mutex_take(mutex.as_ptr(), ticks) == PD_TRUE }
    }

    fn recursive_mutex_give(mutex: &Self::SemaphoreHandle) -> bool {
        // SAFETY: the handle is live.
        unsafe { taskkit_recursive_mutex_give(mutex.as_ptr()) == PD_TRUE }
    }

    fn queue_create(length: usize, item_size: usize) -> Option<Self::QueueHandle> {
        let length = u32::try_from(length).ok()?;
        let item_size = u32::try_from(item_size).ok()?;
        // SAFETY: allocates from the kernel heap; null on failure.
        QueueHandle::from_raw(unsafe { taskkit_queue_create(length, item_size) })
    }

    unsafe fn queue_send(
        queue: &Self::QueueHandle,
        item: *const u8,
        ticks: TickType,
        position: QueuePosition,
    ) -> bool {
        // SAFETY: `item` is valid for the queue's item size (caller).
        unsafe {
            taskkit_queue_send(queue.as_ptr(), item.cast(), ticks, front_flag(position)) == PD_TRUE
        }
    }

    unsafe fn queue_send_from_isr(
        queue: &Self::QueueHandle,
        item: *const u8,
        position: QueuePosition,
    ) -> bool {
        from_isr(|woken| {
            // SAFETY: `item` is valid for the queue's item size (caller).
            unsafe {
                taskkit_queue_send_from_isr(queue.as_ptr(), item.cast(), front_flag(position), woken)
            }
        }) == PD_TRUE
    }

    unsafe fn queue_receive(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool {
        // SAFETY: `out` is valid for the queue's item size (caller).
        unsafe { taskkit_queue_receive(queue.as_ptr(), out.cast(), ticks) == PD_TRUE }
    }

    unsafe fn queue_receive_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool {
        from_isr(|woken| {
            // SAFETY: `out` is valid for the queue's item size (caller).
            unsafe { taskkit_queue_receive_from_isr(queue.as_ptr(), out.cast(), woken) }
        }) == PD_TRUE
    }

    unsafe fn queue_peek(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool {
        // SAFETY: `out` is valid for the queue's item size (caller).
        unsafe { taskkit_queue_peek(queue.as_ptr(), out.cast(), ticks) == PD_TRUE }
    }

    unsafe fn queue_peek_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool {
        // SAFETY: `out` is valid for the queue's item size (caller).
        unsafe { taskkit_queue_peek_from_isr(queue.as_ptr(), out.cast()) == PD_TRUE }
    }

    fn queue_messages_waiting(queue: &Self::QueueHandle) -> usize {
        // SAFETY: the handle is live.
        unsafe { taskkit_queue_messages_waiting(queue.as_ptr()) as usize }
    }

    fn queue_messages_waiting_from_isr(queue: &Self::QueueHandle) -> usize {
        // SAFETY: the handle is live.
        unsafe { taskkit_queue_messages_waiting_from_isr(queue.as_ptr()) as usize }
    }

    fn queue_spaces_available(queue: &Self::QueueHandle) -> usize {
        // SAFETY: the handle is live.
        unsafe { taskkit_queue_spaces_available(queue.as_ptr()) as usize }
    }

    fn queue_reset(queue: &Self::QueueHandle) {
        // SAFETY: the handle is live.
        unsafe { taskkit_queue_reset(queue.as_ptr()) }
    }

    fn queue_delete(queue: Self::QueueHandle) {
        // SAFETY: the handle is live and owned by the caller.
        unsafe { taskkit_queue_delete(queue.as_ptr()) }
    }

    fn event_group_create() -> Option<Self::EventGroupHandle> {
        // SAFETY: allocates from the kernel heap; null on failure.
        EventGroupHandle::from_raw(unsafe { taskkit_event_group_create() })
    }

    fn event_group_wait(
        group: &Self::EventGroupHandle,
        bits: EventBits,
        clear_on_exit: bool,
        wait_for_all: bool,
        ticks: TickType,
    ) -> EventBits {
        // SAFETY: the handle is live.
        unsafe {
            taskkit_event_group_wait(
                group.as_ptr(),
                bits,
                i32::from(clear_on_exit),
                i32::from(wait_for_all),
                ticks,
            )
        }
    }

    fn event_group_set(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits {
        // SAFETY: the handle is live.
        unsafe { taskkit_event_group_set(group.as_ptr(), bits) }
    }

    fn event_group_set_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool {
        // SAFETY: the handle is live; `woken` outlives the call.
        from_isr(|woken| unsafe { taskkit_event_group_set_from_isr(group.as_ptr(), bits, woken) })
            == PD_TRUE
    }

    fn event_group_clear(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits {
        // SAFETY: the handle is live.
        unsafe { taskkit_event_group_clear(group.as_ptr(), bits) }
    }

    fn event_group_clear_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool {
        // SAFETY: the handle is live.
        unsafe { taskkit_event_group_clear_from_isr(group.as_ptr(), bits) == PD_TRUE }
    }

    fn event_group_get(group: &Self::EventGroupHandle) -> EventBits {
        // SAFETY: the handle is live.
        unsafe { taskkit_event_group_get(group.as_ptr()) }
    }

    fn event_group_get_from_isr(group: &Self::EventGroupHandle) -> EventBits {
        // SAFETY: the handle is live.
        unsafe { taskkit_event_group_get_from_isr(group.as_ptr()) }
    }

    fn event_group_delete(group: Self::EventGroupHandle) {
        // SAFETY: the handle is live and owned by the caller.
        unsafe { taskkit_event_group_delete(group.as_ptr()) }
    }

    unsafe fn critical_enter() -> Self::CriticalState {
        // SAFETY: paired with `critical_exit` by the caller.
        unsafe { taskkit_enter_critical() }
    }

    unsafe fn critical_exit(state: Self::CriticalState) {
        // SAFETY: `state` comes from the matching `critical_enter`.
        unsafe { taskkit_exit_critical(state) }
    }
}
