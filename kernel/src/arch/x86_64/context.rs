//! Context switching implementation for x86_64
//!
//! Switches save and restore the register set held in a
//! [`ThreadContext`]: the callee-saved registers (RBX, RBP, R12-R15), RFLAGS,
//! RSP and the resume RIP, plus RDI/RSI so a first dispatch can deliver
//! entry arguments.
//!
//! A suspended context resumes at the end of `switch_context` and returns
//! to its caller; a fresh one jumps straight to its entry point.

use core::arch::naked_asm;

use crate::ke::ThreadContext;

/// Save the running context into `old` and resume `new`
///
/// Returns when `old` is switched back in.
///
/// # Safety
/// - Both pointers must reference live contexts
/// - `new` must hold a valid stack and resume address
/// - Must be called with interrupts disabled
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut ThreadContext, _new: *const ThreadContext) {
    naked_asm!(
        // Save callee-saved registers
        "mov [rdi + 0x18], rbx",
        "mov [rdi + 0x20], rbp",
        "mov [rdi + 0x28], r12",
        "mov [rdi + 0x30], r13",
        "mov [rdi + 0x38], r14",
        "mov [rdi + 0x40], r15",
        "pushfq",
        "pop rax",
        "mov [rdi + 0x10], rax",

        // Resume point and stack (return address still on top)
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x00], rsp",

        "mov rdi, rsi",
        "jmp {load}",

        "2:",
        "ret",
        load = sym load_context,
    )
}

/// Resume `new` without saving the running context
///
/// # Safety
/// - `new` must hold a valid stack and resume address
/// - Must be called with interrupts disabled
#[unsafe(naked)]
pub unsafe extern "C" fn load_context(_new: *const ThreadContext) -> ! {
    naked_asm!(
        "mov rbx, [rdi + 0x18]",
        "mov rbp, [rdi + 0x20]",
        "mov r12, [rdi + 0x28]",
        "mov r13, [rdi + 0x30]",
        "mov r14, [rdi + 0x38]",
        "mov r15, [rdi + 0x40]",

        "mov rsp, [rdi + 0x00]",
        "push qword ptr [rdi + 0x10]",
        "popfq",

        // Entry arguments last; rdi is the context pointer until then
        "mov rax, [rdi + 0x08]",
        "mov rsi, [rdi + 0x50]",
        "mov rdi, [rdi + 0x48]",
        "jmp rax",
    )
}

/// First code a new thread runs: `exit(routine(argument))`
///
/// Expects the routine in R12 and its argument in R13.
#[unsafe(naked)]
pub unsafe extern "C" fn thread_trampoline() -> ! {
    naked_asm!(
        "sub rsp, 8",
        "mov rdi, r13",
        "call r12",
        "mov rdi, rax",
        "call {exit}",
        "ud2",
        exit = sym super::thread_exit,
    )
}
