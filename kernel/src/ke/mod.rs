//! Kernel Executive (ke)
//!
//! The low-level machinery the process manager is built on:
//!
//! - **State machine**: the legal PCB state transitions
//! - **Scheduler queues**: per-priority FIFO ready queues with a summary bitmap
//! - **Context**: the saved register set of an off-CPU process
//! - **Spinlock**: the IRQ-safe lock guarding the descriptor table

pub mod context;
pub mod scheduler;
pub mod spinlock;
pub mod state;

pub use context::ThreadContext;
pub use scheduler::{Dispatch, ReadyQueues, SchedulerEvent};
pub use spinlock::{interrupts_enabled, without_interrupts, SpinLock, SpinLockGuard};
pub use state::{is_legal, transition, ProcessState};
