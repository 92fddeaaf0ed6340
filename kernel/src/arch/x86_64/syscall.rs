//! System call trap (INT 0x80) for x86_64
//!
//! ## Calling Convention
//! The caller pushes its frame and executes `int 0x80`:
//!
//! ```text
//!   push argN ... push arg1
//!   push function
//!   push argc            ; function + arguments
//!   int 0x80             ; RAX = status on return
//! ```
//!
//! The gate is a ring-3 interrupt gate, so interrupts are off for the
//! whole handler. The entry stub saves the scratch registers, reads the
//! caller's RSP out of the interrupt frame and hands it to the dispatcher.

use core::arch::{asm, naked_asm};

use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::config::constants::MAX_SYSCALL_ARGS;
use crate::error::KernelError;
use crate::posix::SyscallInvoker;
use crate::syscall::SyscallNumber;

/// Interrupt vector of the syscall gate
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Install the syscall gate into `idt`
pub fn install(idt: &mut InterruptDescriptorTable) {
    // SAFETY: the stub is a complete interrupt handler ending in iretq
    unsafe {
        idt[SYSCALL_VECTOR]
            .set_handler_addr(VirtAddr::new(syscall_trap_entry as usize as u64))
            .set_privilege_level(PrivilegeLevel::Ring3);
    }
    log::info!(target: "syscall", "gate installed at vector {:#x}", SYSCALL_VECTOR);
}

/// INT 0x80 entry stub
///
/// Stack on entry (interrupt frame pushed by the CPU):
/// - RIP, CS, RFLAGS, RSP, SS
///
/// After saving eight scratch registers and aligning, the caller's RSP is
/// at `[rsp + 96]`.
#[unsafe(naked)]
unsafe extern "C" fn syscall_trap_entry() {
    naked_asm!(
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push r8",
        "push r9",
        "push r10",
        "push r11",

        // Align to 16 for the call
        "sub rsp, 8",

        // Caller RSP: 8 (align) + 64 (scratch) + 24 (RIP, CS, RFLAGS)
        "mov rdi, [rsp + 96]",
        "call {dispatcher}",

        "add rsp, 8",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "iretq",
        dispatcher = sym syscall_trap_dispatch,
    )
}

/// Dispatcher (called from the entry stub)
extern "C" fn syscall_trap_dispatch(user_sp: *const usize) -> isize {
    match crate::multitasker::kernel() {
        // SAFETY: user_sp came out of the interrupt frame
        Some(tasker) => unsafe { tasker.syscall_from_stack(user_sp) },
        None => KernelError::NoSuchFunction.status(),
    }
}

/// Issues syscalls through the trap gate
pub struct TrapInvoker;

impl SyscallInvoker for TrapInvoker {
    fn invoke(&self, number: SyscallNumber, args: &[usize]) -> isize {
        if args.len() > MAX_SYSCALL_ARGS {
            return KernelError::ArgumentCount.status();
        }
        let mut frame = [0usize; MAX_SYSCALL_ARGS + 2];
        frame[0] = args.len() + 1;
        frame[1] = number as usize;
        frame[2..2 + args.len()].copy_from_slice(args);
        let words = args.len() + 2;

        let status: isize;
        // SAFETY: pushes `words` entries, traps, then pops them again
        unsafe {
            asm!(
                "mov rcx, {words}",
                "2:",
                "push qword ptr [{frame} + rcx * 8 - 8]",
                "loop 2b",
                "int 0x80",
                "lea rsp, [rsp + {words} * 8]",
                words = in(reg) words,
                frame = in(reg) frame.as_ptr(),
                out("rax") status,
                out("rcx") _,
            );
        }
        status
    }
}
