//! # Execution Context
//!
//! Interrupt handlers run in place of whatever task was executing, and they
//! must never block. The kernel therefore exposes two entry points for every
//! operation an ISR may perform (give, send, set bits, ...). Calling the task
//! variant from an ISR corrupts kernel state; calling the ISR variant from a
//! task skips the scheduler bookkeeping.
//!
//! Each context-aware wrapper operation asks the [`ContextProbe`] once and
//! dispatches on the resulting [`Context`]. Both branches leave the kernel
//! object in the same state, so callers reason about a single operation.

/// Answers "is the caller executing in interrupt context?".
///
/// Implementations must be side-effect free, constant time, allocation free
/// and callable from any context.
pub trait ContextProbe {
    fn in_isr() -> bool;
}

/// Where the caller is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// A kernel task; may block.
    Task,
    /// An interrupt service routine; must not block.
    Interrupt,
}

impl Context {
    /// Classify the caller using probe `P`.
    #[inline]
    pub fn current<P: ContextProbe>() -> Self {
        if P::in_isr() {
            Context::Interrupt
        } else {
            Context::Task
        }
    }

    #[inline]
    pub fn is_interrupt(self) -> bool {
        self == Context::Interrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{self, Sim};

    #[test]
    fn test_task_context_by_default() {
        assert_eq!(Context::current::<Sim>(), Context::Task);
        assert!(!Sim::in_isr());
    }

    #[test]
    fn test_simulated_interrupt_context() {
        let inside = sim::interrupt(|| Context::current::<Sim>());
        assert_eq!(inside, Context::Interrupt);
        assert!(inside.is_interrupt());
        // Flag is restored on exit
        assert_eq!(Context::current::<Sim>(), Context::Task);
    }

    #[test]
    fn test_nested_interrupts_restore_outer_state() {
        sim::interrupt(|| {
            sim::interrupt(|| assert!(Sim::in_isr()));
            assert!(Sim::in_isr());
        });
        assert!(!Sim::in_isr());
    }
}
