//! Saved execution context
//!
//! The register set a PCB carries while it is off the CPU. The layout is
//! fixed (`repr(C)`) because the context switch in
//! `arch::x86_64::context` addresses fields by offset; a resumed process sees
//! exactly the values that were saved.
//!
//! Besides the callee-saved registers and stack pointer, the context holds
//! `rdi`/`rsi` so a fresh PCB can receive its first two arguments on entry.

use x86_64::VirtAddr;

/// Initial RFLAGS: interrupts enabled, reserved bit 1 set
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Saved register context for context switching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ThreadContext {
    /// RSP register (offset 0x00)
    pub rsp: u64,
    /// RIP register, resume address (offset 0x08)
    pub rip: u64,
    /// RFLAGS register (offset 0x10)
    pub rflags: u64,
    /// RBX register (offset 0x18)
    pub rbx: u64,
    /// RBP register, frame pointer (offset 0x20)
    pub rbp: u64,
    /// R12 register (offset 0x28)
    pub r12: u64,
    /// R13 register (offset 0x30)
    pub r13: u64,
    /// R14 register (offset 0x38)
    pub r14: u64,
    /// R15 register (offset 0x40)
    pub r15: u64,
    /// First argument on entry (offset 0x48)
    pub rdi: u64,
    /// Second argument on entry (offset 0x50)
    pub rsi: u64,
}

impl ThreadContext {
    pub const fn new() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rflags: INITIAL_RFLAGS,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rdi: 0,
            rsi: 0,
        }
    }

    /// Context whose first dispatch begins at `entry` on `stack_top`
    ///
    /// The stack pointer is aligned down to 16 bytes and then offset by one
    /// word, so `entry` observes the same alignment as after a `call`.
    pub fn for_entry(entry: VirtAddr, stack_top: VirtAddr, arg0: u64, arg1: u64) -> Self {
        let rsp = stack_top.align_down(16u64).as_u64().saturating_sub(8);
        Self {
            rsp,
            rip: entry.as_u64(),
            rdi: arg0,
            rsi: arg1,
            ..Self::new()
        }
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}
