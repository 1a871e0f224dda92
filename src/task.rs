//! # Tasks
//!
//! A [`Task`] is a named kernel task with an explicit lifecycle. The code it
//! runs is a [`TaskBody`]; [`FnTask`] adapts a plain closure.
//!
//! ## Lifecycle
//!
//! ```text
//!            start()                suspend()
//!   ┌──────┐ ───────► ┌─────────┐ ───────────► ┌───────────┐
//!   │ Idle │          │ Running │              │ Suspended │
//!   └──────┘ ◄─────── └─────────┘ ◄─────────── └───────────┘
//!      ▲     stop() /               resume()         │
//!      │     body returns                            │
//!      └─────────────────────────────────────────────┘
//!                          stop()
//! ```
//!
//! The kernel handle and the state flag change together inside a
//! [`CriticalSection`](crate::sync::CriticalSection), so the scheduler never
//! observes a started task without a handle or a suspended flag on a running
//! task.
//!
//! The kernel keeps a pointer to the `Task` for as long as the kernel task
//! exists. [`Task::start`] therefore takes `Pin<&Self>`, and dropping a task
//! stops it first.

use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::marker::PhantomPinned;
use core::pin::Pin;
use core::sync::atomic::{AtomicU8, Ordering};

use heapless::String;

use crate::config::{
    DEFAULT_CORE, DEFAULT_FN_TASK_NAME, DEFAULT_PRIORITY, DEFAULT_TASK_NAME, MAX_TASK_NAME_LEN,
    MINIMAL_STACK_SIZE,
};
use crate::error::{or_violation, Error};
use crate::port::{ms_to_ticks, Core, Kernel, TaskParams, MAX_DELAY};
use crate::sync::critical_section;

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// No kernel task exists.
    Idle,
    /// The kernel task exists and is schedulable.
    Running,
    /// The kernel task exists but is suspended.
    Suspended,
}

impl TaskState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Suspended,
            _ => Self::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Creation parameters of a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    name: String<MAX_TASK_NAME_LEN>,
    /// Stack size in the unit the kernel expects.
    pub stack_size: u32,
    /// Priority; higher runs first. 0 is the idle priority.
    pub priority: u8,
    /// Execution unit the task is bound to.
    pub core: Core,
}

impl TaskConfig {
    /// Configuration with the given name and default parameters.
    ///
    /// Names longer than [`MAX_TASK_NAME_LEN`] bytes are cut at the last
    /// character boundary that fits.
    pub fn new(name: &str) -> Self {
        Self {
            name: truncate_name(name),
            stack_size: MINIMAL_STACK_SIZE,
            priority: DEFAULT_PRIORITY,
            core: DEFAULT_CORE,
        }
    }

    pub fn with_stack_size(mut self, stack_size: u32) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_core(mut self, core: Core) -> Self {
        self.core = core;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_NAME)
    }
}

fn truncate_name(name: &str) -> String<MAX_TASK_NAME_LEN> {
    let mut out = String::new();
    for ch in name.chars() {
        if out.push(ch).is_err() {
            log::debug!("task name {:?} truncated to {:?}", name, out.as_str());
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

/// The code a [`Task`] runs.
///
/// `run` executes on the new kernel task. `on_stop` runs on whichever task
/// calls [`Task::stop`] (the task itself when `run` returns), before the
/// kernel task is deleted.
pub trait TaskBody: Sync {
    /// Value handed from [`Task::start`] to [`TaskBody::run`].
    type Arg: Send;

    fn run(&self, arg: Self::Arg);

    fn on_stop(&self) {}
}

/// A task body that calls a closure.
pub struct FnTask<F> {
    f: F,
}

impl<F: Fn() + Send + Sync> FnTask<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: Fn() + Send + Sync> TaskBody for FnTask<F> {
    type Arg = ();

    fn run(&self, _arg: ()) {
        (self.f)()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// State that is only touched inside a critical section.
struct Control<H, A> {
    handle: Option<H>,
    arg: Option<A>,
    /// A `stop` has claimed the task and is running `on_stop`.
    stopping: bool,
}

enum StopClaim {
    Claimed,
    Idle,
    /// Another caller holds the claim.
    Busy,
}

/// A kernel task with a start/stop/suspend/resume lifecycle.
///
/// # Example
///
/// ```ignore
/// struct Blink { led: Led }
///
/// impl TaskBody for Blink {
///     type Arg = u32;
///
///     fn run(&self, period_ms: u32) {
///         loop {
///             self.led.toggle();
///             task::delay::<FreeRtos>(period_ms);
///         }
///     }
/// }
///
/// let blink = cortex_m::singleton!(: Task<FreeRtos, Blink> =
///     Task::new(TaskConfig::new("blink"), Blink { led })).unwrap();
/// Pin::static_ref(blink).start(500);
/// ```
pub struct Task<K: Kernel, B: TaskBody> {
    config: TaskConfig,
    body: B,
    state: AtomicU8,
    control: UnsafeCell<Control<K::TaskHandle, B::Arg>>,
    _pinned: PhantomPinned,
}

// SAFETY: `control` is only accessed inside kernel critical sections; the
// body is `Sync` and the argument is sent to the kernel task once.
unsafe impl<K: Kernel, B: TaskBody> Sync for Task<K, B> {}

impl<K: Kernel, B: TaskBody> Task<K, B> {
    pub const fn new(config: TaskConfig, body: B) -> Self {
        Self {
            config,
            body,
            state: AtomicU8::new(TaskState::Idle as u8),
            control: UnsafeCell::new(Control {
                handle: None,
                arg: None,
                stopping: false,
            }),
            _pinned: PhantomPinned,
        }
    }

    /// Run `f` on the control block inside a critical section.
    ///
    /// `f` must not call back into another method of this task.
    fn with_control<R>(&self, f: impl FnOnce(&mut Control<K::TaskHandle, B::Arg>) -> R) -> R {
        critical_section::<K, _, _>(|_cs| {
            // SAFETY: the critical section excludes every other accessor and
            // `f` does not re-enter.
            f(unsafe { &mut *self.control.get() })
        })
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Create the kernel task and run the body with `arg`.
    ///
    /// Starting a task that is not [`Idle`](TaskState::Idle) is a contract
    /// violation, as is kernel failure to create the task.
    #[track_caller]
    pub fn start(self: Pin<&Self>, arg: B::Arg) {
        or_violation(self.try_start(arg))
    }

    /// Like [`start`](Task::start), but reports failure instead of halting.
    pub fn try_start(self: Pin<&Self>, arg: B::Arg) -> Result<(), Error> {
        let this = self.get_ref();
        let entry = this as *const Self as *mut c_void;
        let params = TaskParams {
            name: this.config.name(),
            stack_size: this.config.stack_size,
            priority: this.config.priority,
            core: this.config.core,
        };
        let result = this.with_control(|control| {
            if control.handle.is_some() {
                return Err(Error::AlreadyStarted);
            }
            // Stored before creation: the trampoline picks it up in its own
            // critical section, which cannot begin before this one ends.
            control.arg = Some(arg);
            match K::task_create(trampoline::<K, B>, entry, &params) {
                Some(handle) => {
                    control.handle = Some(handle);
                    this.set_state(TaskState::Running);
                    Ok(())
                }
                None => {
                    control.arg = None;
                    Err(Error::TaskCreate)
                }
            }
        });
        match result {
            Ok(()) => log::debug!("task {} started", this.config.name()),
            Err(err) => log::warn!("task {}: {}", this.config.name(), err),
        }
        result
    }

    /// Stop the task: run [`TaskBody::on_stop`], return to
    /// [`Idle`](TaskState::Idle) and delete the kernel task.
    ///
    /// No-op when the task is idle. When another caller is already stopping
    /// the task, waits until it has finished, so the task is idle once this
    /// returns. Called by the task itself, this does not return.
    ///
    /// `on_stop` must not call `stop` on its own task.
    pub fn stop(&self) {
        loop {
            match self.claim_stop() {
                StopClaim::Claimed => break,
                StopClaim::Idle => return,
                StopClaim::Busy => K::task_delay(1),
            }
        }
        if let Some(handle) = self.release() {
            K::task_delete(handle);
        }
    }

    fn claim_stop(&self) -> StopClaim {
        self.with_control(|control| {
            if control.stopping {
                StopClaim::Busy
            } else if control.handle.is_none() {
                StopClaim::Idle
            } else {
                control.stopping = true;
                StopClaim::Claimed
            }
        })
    }

    /// Second half of a claimed stop. Once the critical section below ends,
    /// waiters return and the task may be freed: callers must not touch
    /// `self` again.
    fn release(&self) -> Option<K::TaskHandle> {
        self.body.on_stop();
        log::debug!("task {} stopped", self.config.name());
        self.with_control(|control| {
            self.set_state(TaskState::Idle);
            control.stopping = false;
            control.handle.take()
        })
    }

    /// Suspend a running task. No-op in any other state.
    pub fn suspend(&self) {
        let suspended = self.with_control(|control| match &control.handle {
            Some(handle) if self.state() == TaskState::Running => {
                K::task_suspend(handle);
                self.set_state(TaskState::Suspended);
                true
            }
            _ => false,
        });
        if suspended {
            log::debug!("task {} suspended", self.config.name());
        }
    }

    /// Resume a suspended task. No-op in any other state.
    pub fn resume(&self) {
        let resumed = self.with_control(|control| match &control.handle {
            Some(handle) if self.state() == TaskState::Suspended => {
                K::task_resume(handle);
                self.set_state(TaskState::Running);
                true
            }
            _ => false,
        });
        if resumed {
            log::debug!("task {} resumed", self.config.name());
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    /// A copy of the live kernel handle, if any.
    pub fn raw(&self) -> Option<K::TaskHandle>
    where
        K::TaskHandle: Clone,
    {
        self.with_control(|control| control.handle.clone())
    }
}

impl<K: Kernel, F: Fn() + Send + Sync> Task<K, FnTask<F>> {
    /// A task named [`DEFAULT_FN_TASK_NAME`] that calls `f`.
    pub fn from_fn(f: F) -> Self {
        Self::new(TaskConfig::new(DEFAULT_FN_TASK_NAME), FnTask::new(f))
    }
}

impl<K: Kernel, B: TaskBody> Drop for Task<K, B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Entry point of every kernel task created by [`Task::try_start`].
extern "C" fn trampoline<K: Kernel, B: TaskBody>(param: *mut c_void) {
    // SAFETY: `param` is the pinned task that created this kernel task. It
    // cannot be moved or dropped until `release` below has returned the
    // handle, or another caller has deleted this kernel task.
    let task = unsafe { &*(param as *const Task<K, B>) };
    if let Some(arg) = task.with_control(|control| control.arg.take()) {
        task.body.run(arg);
    }
    if let StopClaim::Claimed = task.claim_stop() {
        if let Some(handle) = task.release() {
            // `task` may already be freed here
            K::task_delete(handle);
        }
    }
    // Another caller is stopping this task and will delete it
    loop {
        K::task_delay(MAX_DELAY);
    }
}

/// Block the calling task for at least `ms` milliseconds.
pub fn delay<K: Kernel>(ms: u32) {
    debug_assert!(!K::in_isr(), "task::delay from interrupt context");
    K::task_delay(ms_to_ticks::<K>(ms));
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
