//! x86_64 architecture support
//!
//! - Context switching
//! - System call trap (INT 0x80) and the trap invoker
//! - The hardware [`Processor`] the multitasker drives

pub mod context;
pub mod syscall;

pub use syscall::{install as install_syscall_gate, TrapInvoker, SYSCALL_VECTOR};

use x86_64::instructions::{hlt, interrupts};

use crate::multitasker::{Multitasker, Processor};
use crate::ps::Pid;

/// Processor backed by the real CPU
pub struct HardwareProcessor;

impl Processor for HardwareProcessor {
    fn switch(&self, tasker: &Multitasker, prev: Option<Pid>, next: Pid) {
        let (old, new) = {
            let mut pm = tasker.lock();
            let new = pm.context_ptr(next);
            if pm.take_fresh(next) {
                if let (Some(start), Some(ctx)) = (pm.thread_start(next), new) {
                    // SAFETY: PCB is boxed and the lock is held
                    unsafe {
                        (*ctx).rip = context::thread_trampoline as usize as u64;
                        (*ctx).r12 = start.routine as u64;
                        (*ctx).r13 = start.argument as u64;
                    }
                }
            }
            (prev.and_then(|pid| pm.context_ptr(pid)), new)
        };

        let Some(new) = new else {
            log::error!(target: "ke::sched", "BUG: dispatched pid {} has no context", next);
            return;
        };
        // SAFETY: both contexts live in boxed PCBs that cannot be reaped
        // while the CPU is on them; `Multitasker::reschedule` keeps
        // interrupts masked across the switch.
        unsafe {
            match old {
                Some(old) => context::switch_context(old, new),
                None => context::load_context(new),
            }
        }
    }

    fn idle(&self, _tasker: &Multitasker) {
        interrupts::enable_and_hlt();
        interrupts::disable();
    }
}

/// Where a thread's start routine returns to
extern "C" fn thread_exit(code: isize) -> ! {
    if let Some(tasker) = crate::multitasker::kernel() {
        if let Err(e) = tasker.exit(code as i32) {
            log::error!(target: "ps", "thread exit failed: {}", e);
        }
    }
    loop {
        hlt();
    }
}

/// Timer hook for the platform's tick interrupt handler
pub fn on_timer_interrupt() {
    if let Some(tasker) = crate::multitasker::kernel() {
        if let Err(e) = tasker.timer_interrupt() {
            log::error!(target: "ke::sched", "timer tick failed: {}", e);
        }
    }
}
