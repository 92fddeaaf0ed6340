//! Multitasker
//!
//! Process and thread lifecycle management for an x86_64 kernel, with the
//! system call gate user code reaches it through.
//!
//! # Architecture Overview
//!
//! - **ke** - Kernel core: state machine, ready queues, IRQ-safe spinlock,
//!   saved register context
//! - **ps** - Process Manager: PCBs, descriptor table, spawn, join/exit/kill,
//!   introspection
//! - **mm** - Memory Manager interface consumed by the process manager
//! - **ldr** - Program images handed over by the loader
//! - **syscall** - Gate, dispatch table, handlers, user buffer probing
//! - **posix** - pthread emulation on top of the syscalls
//! - **arch** - Context switch and trap entry (bare metal only)
//! - **multitasker** - The locked facade tying them together
//!
//! # Initialization
//!
//! On hardware the platform calls [`multitasker::init`] once paging and the
//! heap are up, installs the syscall gate into its IDT and forwards timer
//! ticks. The caller becomes the kernel process, pid 0.

#![cfg_attr(not(test), no_std)]
// Kernel-specific lint configurations:
// - missing_safety_doc: Raw context and user-pointer helpers are unsafe by nature
// - new_without_default: Kernel structs often have specific initialization requirements
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod ke;
pub mod ldr;
pub mod mm;
pub mod multitasker;
pub mod posix;
pub mod ps;
pub mod syscall;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod logger;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod serial;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{KResult, KernelError};
pub use multitasker::{Multitasker, Processor};
pub use ke::ProcessState;
pub use ps::{Pid, ProcessInfo};
