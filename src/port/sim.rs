//! # Simulated Kernel
//!
//! An in-process implementation of [`Kernel`] for host builds. Tasks are
//! `std` threads; semaphores, queues and event groups are mutex + condition
//! variable pairs with the same blocking, timeout and ISR semantics as the
//! FreeRTOS objects they stand in for. One tick is one millisecond.
//!
//! The simulation is not a scheduler. Where a real kernel preempts, the sim
//! relies on the host OS, and two behaviours are cooperative:
//!
//! - **Suspension** takes effect at the suspended task's next kernel call
//!   (delay, blocking wait) and holds it there until resumed.
//! - **Deletion** parks the task forever at its next kernel call; deleting
//!   the calling task parks it immediately. A deleted task never runs again.
//!
//! Interrupt context is a per-thread flag, entered with [`interrupt`].
//! Object creation can be made to fail with [`fail_next_creates`], which also
//! applies per thread so parallel tests do not interfere.
//!
//! A panicking task body aborts the process, just as it would halt a target.

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::string::String;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use super::{
    Core, EventBits, Kernel, QueuePosition, TaskEntry, TaskParams, TickType, MAX_DELAY,
};
use crate::context::ContextProbe;

/// Host simulation of the kernel.
pub struct Sim;

std::thread_local! {
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
    static CURRENT_TASK: RefCell<Option<Arc<SimTask>>> = const { RefCell::new(None) };
    static FAILING_CREATES: Cell<usize> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// Test controls
// ---------------------------------------------------------------------------

/// Run `f` as if it were an interrupt service routine on this thread.
pub fn interrupt<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            IN_ISR.with(|flag| flag.set(self.0));
        }
    }

    let _restore = Restore(IN_ISR.with(|flag| flag.replace(true)));
    f()
}

/// Make the next `count` object creations on this thread fail, as if the
/// kernel heap were exhausted.
pub fn fail_next_creates(count: usize) {
    FAILING_CREATES.with(|n| n.set(count));
}

fn creation_fails() -> bool {
    FAILING_CREATES.with(|n| match n.get() {
        0 => false,
        left => {
            n.set(left - 1);
            true
        }
    })
}

// ---------------------------------------------------------------------------
// Blocking helpers
// ---------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ticks_to_duration(ticks: TickType) -> Option<Duration> {
    if ticks == MAX_DELAY {
        None
    } else {
        let ms = u64::from(ticks) * 1000 / u64::from(Sim::TICK_RATE_HZ);
        Some(Duration::from_millis(ms))
    }
}

/// Wait on `cond` until `ready` yields a value or `ticks` elapse. On timeout
/// the guard is handed back so the caller can inspect the final state.
fn wait_until<'a, T, R>(
    mutex: &'a Mutex<T>,
    cond: &Condvar,
    ticks: TickType,
    mut ready: impl FnMut(&mut T) -> Option<R>,
) -> Result<R, MutexGuard<'a, T>> {
    let deadline = ticks_to_duration(ticks).map(|d| Instant::now() + d);
    let mut guard = lock(mutex);
    loop {
        if let Some(value) = ready(&mut guard) {
            return Ok(value);
        }
        guard = match deadline {
            None => cond.wait(guard).unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(guard);
                }
                cond.wait_timeout(guard, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
    }
}

fn assert_may_block() {
    assert!(!Sim::in_isr(), "blocking kernel call from interrupt context");
}

/// Hold the calling task while it is suspended, forever once deleted.
fn checkpoint() {
    if Sim::in_isr() {
        return;
    }
    if let Some(task) = CURRENT_TASK.with(|current| current.borrow().clone()) {
        task.hold_while_stopped();
    }
}

fn is_current(task: &Arc<SimTask>) -> bool {
    CURRENT_TASK.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|me| Arc::ptr_eq(me, task))
    })
}

// ---------------------------------------------------------------------------
// Simulated objects
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TaskFlags {
    suspended: bool,
    deleted: bool,
}

/// A simulated kernel task.
#[derive(Debug)]
pub struct SimTask {
    name: String,
    stack_size: u32,
    priority: u8,
    core: Core,
    flags: Mutex<TaskFlags>,
    cond: Condvar,
}

impl SimTask {
    fn new(params: &TaskParams<'_>) -> Self {
        Self {
            name: params.name.into(),
            stack_size: params.stack_size,
            priority: params.priority,
            core: params.core,
            flags: Mutex::new(TaskFlags::default()),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn core(&self) -> Core {
        self.core
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.flags).suspended
    }

    pub fn is_deleted(&self) -> bool {
        lock(&self.flags).deleted
    }

    fn hold_while_stopped(&self) {
        let mut flags = lock(&self.flags);
        while flags.suspended || flags.deleted {
            flags = self.cond.wait(flags).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn update(&self, f: impl FnOnce(&mut TaskFlags)) {
        f(&mut lock(&self.flags));
        self.cond.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SemaphoreKind {
    Binary,
    RecursiveMutex,
}

#[derive(Debug, Default)]
struct SemaphoreState {
    available: bool,
    owner: Option<ThreadId>,
    depth: u32,
}

/// A simulated binary semaphore or recursive mutex.
#[derive(Debug)]
pub struct SimSemaphore {
    kind: SemaphoreKind,
    state: Mutex<SemaphoreState>,
    cond: Condvar,
    deleted: AtomicBool,
}

impl SimSemaphore {
    fn new(kind: SemaphoreKind) -> Self {
        Self {
            kind,
            state: Mutex::new(SemaphoreState::default()),
            cond: Condvar::new(),
            deleted: AtomicBool::new(false),
        }
    }

    /// Current recursion depth of a mutex; 0 when free.
    pub fn depth(&self) -> u32 {
        lock(&self.state).depth
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn give(&self) -> bool {
        debug_assert_eq!(self.kind, SemaphoreKind::Binary);
        let mut state = lock(&self.state);
        if state.available {
            return false;
        }
        state.available = true;
        self.cond.notify_all();
        true
    }
}

/// A simulated fixed-capacity queue of raw items.
#[derive(Debug)]
pub struct SimQueue {
    length: usize,
    item_size: usize,
    items: Mutex<VecDeque<Box<[u8]>>>,
    cond: Condvar,
    deleted: AtomicBool,
}

impl SimQueue {
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// # Safety
    /// `item` must be valid for reads of `item_size` bytes.
    unsafe fn copy_in(&self, item: *const u8) -> Box<[u8]> {
        // SAFETY: guaranteed by the caller.
        unsafe { core::slice::from_raw_parts(item, self.item_size) }.into()
    }

    /// # Safety
    /// `out` must be valid for writes of `item_size` bytes.
    unsafe fn copy_out(&self, item: &[u8], out: *mut u8) {
        // SAFETY: guaranteed by the caller; `item` holds `item_size` bytes.
        unsafe { core::ptr::copy_nonoverlapping(item.as_ptr(), out, self.item_size) };
    }

    fn push(&self, items: &mut VecDeque<Box<[u8]>>, item: Box<[u8]>, position: QueuePosition) {
        match position {
            QueuePosition::Back => items.push_back(item),
            QueuePosition::Front => items.push_front(item),
        }
        self.cond.notify_all();
    }
}

/// A simulated event group.
#[derive(Debug)]
pub struct SimEventGroup {
    bits: Mutex<EventBits>,
    cond: Condvar,
    deleted: AtomicBool,
}

impl SimEventGroup {
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

struct SendPtr(*mut c_void);

// SAFETY: the pointer is handed to the task entry unchanged; the task layer
// guarantees the pointee outlives the task.
unsafe impl Send for SendPtr {}

impl SendPtr {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Kernel implementation
// ---------------------------------------------------------------------------

impl ContextProbe for Sim {
    fn in_isr() -> bool {
        IN_ISR.with(Cell::get)
    }
}

impl Kernel for Sim {
    type TaskHandle = Arc<SimTask>;
    type SemaphoreHandle = Arc<SimSemaphore>;
    type QueueHandle = Arc<SimQueue>;
    type EventGroupHandle = Arc<SimEventGroup>;
    type CriticalState = critical_section::RestoreState;

    const TICK_RATE_HZ: u32 = 1000;
    const EVENT_BITS: u32 = 24;

    fn task_create(
        entry: TaskEntry,
        arg: *mut c_void,
        params: &TaskParams<'_>,
    ) -> Option<Self::TaskHandle> {
        if creation_fails() {
            return None;
        }
        let task = Arc::new(SimTask::new(params));
        let spawned = Arc::clone(&task);
        let arg = SendPtr(arg);
        thread::Builder::new()
            .name(params.name.into())
            .spawn(move || {
                let arg = arg.into_inner();
                CURRENT_TASK.with(|current| *current.borrow_mut() = Some(Arc::clone(&spawned)));
                spawned.hold_while_stopped();
                entry(arg);
            })
            .ok()?;
        Some(task)
    }

    fn task_delete(task: Self::TaskHandle) {
        task.update(|flags| flags.deleted = true);
        if is_current(&task) {
            checkpoint();
        }
    }

    fn task_suspend(task: &Self::TaskHandle) {
        task.update(|flags| flags.suspended = true);
    }

    fn task_resume(task: &Self::TaskHandle) {
        task.update(|flags| flags.suspended = false);
    }

    fn task_delay(ticks: TickType) {
        assert_may_block();
        checkpoint();
        match CURRENT_TASK.with(|current| current.borrow().clone()) {
            // Wake early only to honour deletion
            Some(task) => {
                let _ = wait_until(&task.flags, &task.cond, ticks, |flags| {
                    flags.deleted.then_some(())
                });
            }
            None => match ticks_to_duration(ticks) {
                Some(duration) => thread::sleep(duration),
                None => loop {
                    thread::park();
                },
            },
        }
        checkpoint();
    }

    fn binary_semaphore_create() -> Option<Self::SemaphoreHandle> {
        if creation_fails() {
            return None;
        }
        Some(Arc::new(SimSemaphore::new(SemaphoreKind::Binary)))
    }

    fn semaphore_take(sem: &Self::SemaphoreHandle, ticks: TickType) -> bool {
        assert_may_block();
        checkpoint();
        let taken = wait_until(&sem.state, &sem.cond, ticks, |state| {
            if state.available {
                state.available = false;
                Some(())
            } else {
                None
            }
        })
        .is_ok();
        checkpoint();
        taken
    }

    fn semaphore_give(sem: &Self::SemaphoreHandle) -> bool {
        sem.give()
    }

    fn semaphore_give_from_isr(sem: &Self::SemaphoreHandle) -> bool {
        sem.give()
    }

    fn semaphore_delete(sem: Self::SemaphoreHandle) {
        sem.deleted.store(true, Ordering::Release);
    }

    fn recursive_mutex_create() -> Option<Self::SemaphoreHandle> {
        if creation_fails() {
            return None;
        }
        Some(Arc::new(SimSemaphore::new(SemaphoreKind::RecursiveMutex)))
    }

    fn recursive_mutex_take(mutex: &Self::SemaphoreHandle, ticks: TickType) -> bool {
        assert_may_block();
        checkpoint();
        let me = thread::current().id();
        let taken = wait_until(&mutex.state, &mutex.cond, ticks, |state| match state.owner {
            Some(owner) if owner == me => {
                state.depth += 1;
                Some(())
            }
            Some(_) => None,
            None => {
                state.owner = Some(me);
                state.depth = 1;
                Some(())
            }
        })
        .is_ok();
        checkpoint();
        taken
    }

    fn recursive_mutex_give(mutex: &Self::SemaphoreHandle) -> bool {
        let mut state = lock(&mutex.state);
        if state.owner != Some(thread::current().id()) {
            return false;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            mutex.cond.notify_all();
        }
        true
    }

    fn queue_create(length: usize, item_size: usize) -> Option<Self::QueueHandle> {
        if creation_fails() || length == 0 {
            return None;
        }
        Some(Arc::new(SimQueue {
            length,
            item_size,
            items: Mutex::new(VecDeque::with_capacity(length)),
            cond: Condvar::new(),
            deleted: AtomicBool::new(false),
        }))
    }

    unsafe fn queue_send(
        queue: &Self::QueueHandle,
        item: *const u8,
        ticks: TickType,
        position: QueuePosition,
    ) -> bool {
        assert_may_block();
        checkpoint();
        // SAFETY: forwarded from the caller.
        let item = unsafe { queue.copy_in(item) };
        let mut item = Some(item);
        let sent = wait_until(&queue.items, &queue.cond, ticks, |items| {
            if items.len() < queue.length {
                item.take().map(|item| queue.push(items, item, position))
            } else {
                None
            }
        })
        .is_ok();
        checkpoint();
        sent
    }

    unsafe fn queue_send_from_isr(
        queue: &Self::QueueHandle,
        item: *const u8,
        position: QueuePosition,
    ) -> bool {
        let mut items = lock(&queue.items);
        if items.len() >= queue.length {
            return false;
        }
        // SAFETY: forwarded from the caller.
        let item = unsafe { queue.copy_in(item) };
        queue.push(&mut items, item, position);
        true
    }

    unsafe fn queue_receive(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool {
        assert_may_block();
        checkpoint();
        let received = wait_until(&queue.items, &queue.cond, ticks, |items| items.pop_front());
        let received = match received {
            Ok(item) => {
                queue.cond.notify_all();
                // SAFETY: forwarded from the caller.
                unsafe { queue.copy_out(&item, out) };
                true
            }
            Err(_) => false,
        };
        checkpoint();
        received
    }

    unsafe fn queue_receive_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool {
        let mut items = lock(&queue.items);
        match items.pop_front() {
            Some(item) => {
                queue.cond.notify_all();
                // SAFETY: forwarded from the caller.
                unsafe { queue.copy_out(&item, out) };
                true
            }
            None => false,
        }
    }

    unsafe fn queue_peek(queue: &Self::QueueHandle, out: *mut u8, ticks: TickType) -> bool {
        assert_may_block();
        checkpoint();
        let peeked = wait_until(&queue.items, &queue.cond, ticks, |items| {
            // SAFETY: forwarded from the caller.
            items.front().map(|item| unsafe { queue.copy_out(item, out) })
        })
        .is_ok();
        checkpoint();
        peeked
    }

    unsafe fn queue_peek_from_isr(queue: &Self::QueueHandle, out: *mut u8) -> bool {
        let items = lock(&queue.items);
        match items.front() {
            Some(item) => {
                // SAFETY: forwarded from the caller.
                unsafe { queue.copy_out(item, out) };
                true
            }
            None => false,
        }
    }

    fn queue_messages_waiting(queue: &Self::QueueHandle) -> usize {
        lock(&queue.items).len()
    }

    fn queue_messages_waiting_from_isr(queue: &Self::QueueHandle) -> usize {
        lock(&queue.items).len()
    }

    fn queue_spaces_available(queue: &Self::QueueHandle) -> usize {
        queue.length - lock(&queue.items).len()
    }

    fn queue_reset(queue: &Self::QueueHandle) {
        lock(&queue.items).clear();
        queue.cond.notify_all();
    }

    fn queue_delete(queue: Self::QueueHandle) {
        queue.deleted.store(true, Ordering::Release);
    }

    fn event_group_create() -> Option<Self::EventGroupHandle> {
        if creation_fails() {
            return None;
        }
        Some(Arc::new(SimEventGroup {
            bits: Mutex::new(0),
            cond: Condvar::new(),
            deleted: AtomicBool::new(false),
        }))
    }

    fn event_group_wait(
        group: &Self::EventGroupHandle,
        bits: EventBits,
        clear_on_exit: bool,
        wait_for_all: bool,
        ticks: TickType,
    ) -> EventBits {
        assert_may_block();
        checkpoint();
        let value = wait_until(&group.bits, &group.cond, ticks, |current| {
            let matched = if wait_for_all {
                *current & bits == bits
            } else {
                *current & bits != 0
            };
            matched.then(|| {
                let value = *current;
                if clear_on_exit {
                    *current &= !bits;
                }
                value
            })
        })
        .unwrap_or_else(|current| *current);
        checkpoint();
        value
    }

    fn event_group_set(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits {
        let mut current = lock(&group.bits);
        *current |= bits;
        group.cond.notify_all();
        *current
    }

    fn event_group_set_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool {
        // No timer service task to defer to; applied immediately
        Self::event_group_set(group, bits);
        true
    }

    fn event_group_clear(group: &Self::EventGroupHandle, bits: EventBits) -> EventBits {
        let mut current = lock(&group.bits);
        let previous = *current;
        *current &= !bits;
        previous
    }

    fn event_group_clear_from_isr(group: &Self::EventGroupHandle, bits: EventBits) -> bool {
        Self::event_group_clear(group, bits);
        true
    }

    fn event_group_get(group: &Self::EventGroupHandle) -> EventBits {
        *lock(&group.bits)
    }

    fn event_group_get_from_isr(group: &Self::EventGroupHandle) -> EventBits {
        *lock(&group.bits)
    }

    fn event_group_delete(group: Self::EventGroupHandle) {
        group.deleted.store(true, Ordering::Release);
    }

    unsafe fn critical_enter() -> Self::CriticalState {
        // SAFETY: paired with `critical_exit` by the caller.
        unsafe { critical_section::acquire() }
    }

    unsafe fn critical_exit(state: Self::CriticalState) {
        // SAFETY: `state` comes from the matching `critical_enter`.
        unsafe { critical_section::release(state) }
    }
}
