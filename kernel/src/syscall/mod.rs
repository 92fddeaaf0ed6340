//! System Call Gate
//!
//! User code enters the kernel through one software interrupt. Arguments
//! travel on the caller's stack:
//!
//! ```text
//!   sp + 0x00   argc        function number + arguments
//!   sp + 0x08   function    SyscallNumber
//!   sp + 0x10   arg1
//!   ...
//!   sp + 8*argc arg(argc-1)
//! ```
//!
//! The gate checks, in order:
//! 1. the function number is in range and registered (`NoSuchFunction`)
//! 2. the argument count matches the function's arity (`ArgumentCount`)
//! 3. privileged functions are called from supervisor code (`Permission`)
//!
//! Handlers run without the multitasker lock; they take it for the duration
//! of each operation they perform. Results travel back as one signed word:
//! non-negative on success, a negative [`KernelError`] code on failure.

pub mod handlers;
pub mod user;

use core::fmt;

use bitflags::bitflags;

use crate::config::constants::MAX_SYSCALL_ARGS;
use crate::error::{KResult, KernelError};
use crate::multitasker::Multitasker;
use crate::ps::{Pid, Privilege};

/// Number of syscall functions
pub const SYSCALL_COUNT: usize = 19;

/// Syscall function numbers
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyscallNumber {
    // Lifecycle
    Exit = 0,
    Yield = 1,
    Spawn = 2,
    SpawnThread = 3,
    Block = 4,
    Kill = 5,
    KillDefault = 6,

    // Identity
    GetPid = 7,
    GetParentPid = 8,

    // Scheduling control
    Sleep = 9,
    Stop = 10,
    Resume = 11,
    Detach = 12,

    // Introspection
    ListProcesses = 13,
    GetProcessInfo = 14,
    GetPrivilege = 15,
    SetPrivilege = 16,
    GetPriority = 17,
    SetPriority = 18,
}

bitflags! {
    /// Per-function gate attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyscallFlags: u8 {
        /// Supervisor callers only
        const PRIVILEGED = 1 << 0;
        /// May take the caller off the CPU
        const BLOCKING   = 1 << 1;
    }
}

impl SyscallNumber {
    pub const ALL: [SyscallNumber; SYSCALL_COUNT] = [
        SyscallNumber::Exit,
        SyscallNumber::Yield,
        SyscallNumber::Spawn,
        SyscallNumber::SpawnThread,
        SyscallNumber::Block,
        SyscallNumber::Kill,
        SyscallNumber::KillDefault,
        SyscallNumber::GetPid,
        SyscallNumber::GetParentPid,
        SyscallNumber::Sleep,
        SyscallNumber::Stop,
        SyscallNumber::Resume,
        SyscallNumber::Detach,
        SyscallNumber::ListProcesses,
        SyscallNumber::GetProcessInfo,
        SyscallNumber::GetPrivilege,
        SyscallNumber::SetPrivilege,
        SyscallNumber::GetPriority,
        SyscallNumber::SetPriority,
    ];

    pub fn from_raw(raw: usize) -> Option<Self> {
        Self::ALL.get(raw).copied()
    }

    /// Arguments the function takes, not counting the function number
    pub const fn arity(self) -> usize {
        use SyscallNumber::*;
        match self {
            Yield | GetPid | GetParentPid => 0,
            Exit | Spawn | KillDefault | Sleep | Stop | Resume | Detach | GetPrivilege
            | GetPriority => 1,
            SpawnThread | Block | Kill | ListProcesses | GetProcessInfo | SetPrivilege
            | SetPriority => 2,
        }
    }

    pub const fn flags(self) -> SyscallFlags {
        use SyscallNumber::*;
        match self {
            Exit | Yield | Block | Sleep | Stop | Kill | KillDefault => SyscallFlags::BLOCKING,
            SetPrivilege => SyscallFlags::PRIVILEGED,
            _ => SyscallFlags::empty(),
        }
    }

    pub const fn name(self) -> &'static str {
        use SyscallNumber::*;
        match self {
            Exit => "exit",
            Yield => "yield",
            Spawn => "spawn",
            SpawnThread => "spawn_thread",
            Block => "block",
            Kill => "kill",
            KillDefault => "kill_default",
            GetPid => "getpid",
            GetParentPid => "getppid",
            Sleep => "sleep",
            Stop => "stop",
            Resume => "resume",
            Detach => "detach",
            ListProcesses => "list_processes",
            GetProcessInfo => "get_process_info",
            GetPrivilege => "get_privilege",
            SetPrivilege => "set_privilege",
            GetPriority => "get_priority",
            SetPriority => "set_priority",
        }
    }
}

impl fmt::Display for SyscallNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of one call, already copied off the user stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    values: [usize; MAX_SYSCALL_ARGS],
    len: usize,
}

impl SyscallArgs {
    pub fn new(args: &[usize]) -> KResult<Self> {
        if args.len() > MAX_SYSCALL_ARGS {
            return Err(KernelError::ArgumentCount);
        }
        let mut values = [0; MAX_SYSCALL_ARGS];
        values[..args.len()].copy_from_slice(args);
        Ok(Self {
            values,
            len: args.len(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> usize {
        if index < self.len {
            self.values[index]
        } else {
            0
        }
    }

    /// Argument as a pid; values beyond the pid range are invalid
    pub fn pid(&self, index: usize) -> KResult<Pid> {
        Pid::try_from(self.get(index)).map_err(|_| KernelError::InvalidArgument)
    }

    pub fn flag(&self, index: usize) -> bool {
        self.get(index) != 0
    }

    /// Argument as an exit code (low 32 bits, sign extended)
    pub fn code(&self, index: usize) -> i32 {
        self.get(index) as i32
    }
}

/// Handler: (multitasker, caller, arguments) -> result word
pub type SyscallHandler = fn(&Multitasker, Pid, &SyscallArgs) -> KResult<isize>;

#[derive(Clone, Copy)]
struct SyscallEntry {
    handler: SyscallHandler,
    arity: usize,
    flags: SyscallFlags,
}

/// Syscall dispatch table
pub struct SyscallTable {
    entries: [Option<SyscallEntry>; SYSCALL_COUNT],
}

impl SyscallTable {
    pub const fn empty() -> Self {
        Self {
            entries: [None; SYSCALL_COUNT],
        }
    }

    /// Table with every kernel handler registered
    pub fn with_defaults() -> KResult<Self> {
        let mut table = Self::empty();
        for (number, handler, arity) in handlers::DEFAULT_HANDLERS {
            table.register(*number, *handler, *arity)?;
        }
        log::debug!(target: "syscall", "{} syscalls registered", table.registered());
        Ok(table)
    }

    /// Register a handler
    ///
    /// The declared arity has to agree with the function number.
    pub fn register(
        &mut self,
        number: SyscallNumber,
        handler: SyscallHandler,
        arity: usize,
    ) -> KResult<()> {
        if arity != number.arity() {
            log::error!(
                target: "syscall",
                "{} registered with {} arguments, takes {}",
                number,
                arity,
                number.arity()
            );
            return Err(KernelError::ArgumentCount);
        }
        let slot = &mut self.entries[number as usize];
        if slot.is_some() {
            return Err(KernelError::Already);
        }
        *slot = Some(SyscallEntry {
            handler,
            arity,
            flags: number.flags(),
        });
        Ok(())
    }

    pub fn is_registered(&self, number: SyscallNumber) -> bool {
        self.entries[number as usize].is_some()
    }

    pub fn registered(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Validate and run one call
    pub fn dispatch(
        &self,
        tasker: &Multitasker,
        caller: Pid,
        privilege: Privilege,
        function: usize,
        args: &[usize],
    ) -> KResult<isize> {
        let Some(number) = SyscallNumber::from_raw(function) else {
            log::warn!(target: "syscall", "pid {}: no syscall {}", caller, function);
            return Err(KernelError::NoSuchFunction);
        };
        let entry = self.entries[number as usize].ok_or(KernelError::NoSuchFunction)?;

        if args.len() != entry.arity {
            log::warn!(
                target: "syscall",
                "pid {}: {} with {} arguments, takes {}",
                caller,
                number,
                args.len(),
                entry.arity
            );
            return Err(KernelError::ArgumentCount);
        }
        if entry.flags.contains(SyscallFlags::PRIVILEGED) && privilege != Privilege::Supervisor {
            log::warn!(target: "syscall", "pid {}: {} needs supervisor", caller, number);
            return Err(KernelError::Permission);
        }

        log::trace!(target: "syscall", "pid {}: {}{:?}", caller, number, args);
        let args = SyscallArgs::new(args)?;
        (entry.handler)(tasker, caller, &args)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::empty()
    }
}

/// A user string: pointer and byte length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct UserStr {
    pub ptr: usize,
    pub len: usize,
}

impl UserStr {
    pub fn new(s: &str) -> Self {
        Self {
            ptr: s.as_ptr() as usize,
            len: s.len(),
        }
    }
}

bitflags! {
    /// `SpawnParams::flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpawnFlags: u64 {
        /// Create `Stopped`
        const STOPPED = 1 << 0;
        /// Trusted loader path; supervisor callers only
        const TRUSTED = 1 << 1;
    }
}

/// `privilege` / `priority` value meaning "default"
pub const SPAWN_DEFAULT: usize = usize::MAX;

/// Argument block of the `Spawn` syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SpawnParams {
    pub entry: usize,
    pub code_base: usize,
    pub code_size: usize,
    pub name: UserStr,
    /// Array of `argc` [`UserStr`]
    pub argv: usize,
    pub argc: usize,
    pub privilege: usize,
    pub priority: usize,
    pub flags: u64,
}

impl SpawnParams {
    pub fn new(entry: usize, name: UserStr) -> Self {
        Self {
            entry,
            code_base: 0,
            code_size: 0,
            name,
            argv: 0,
            argc: 0,
            privilege: SPAWN_DEFAULT,
            priority: SPAWN_DEFAULT,
            flags: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &Multitasker, _: Pid, _: &SyscallArgs) -> KResult<isize> {
        Ok(0)
    }

    #[test]
    fn test_numbers_match_positions() {
        for (i, number) in SyscallNumber::ALL.iter().enumerate() {
            assert_eq!(*number as usize, i);
            assert_eq!(SyscallNumber::from_raw(i), Some(*number));
        }
        assert_eq!(SyscallNumber::from_raw(SYSCALL_COUNT), None);
    }

    #[test]
    fn test_register_checks_arity_and_duplicates() {
        let mut table = SyscallTable::empty();
        assert_eq!(
            table.register(SyscallNumber::Kill, nop, 1),
            Err(KernelError::ArgumentCount)
        );
        table.register(SyscallNumber::Kill, nop, 2).unwrap();
        assert_eq!(
            table.register(SyscallNumber::Kill, nop, 2),
            Err(KernelError::Already)
        );
        assert!(table.is_registered(SyscallNumber::Kill));
        assert!(!table.is_registered(SyscallNumber::Exit));
    }

    #[test]
    fn test_defaults_cover_every_function() {
        let table = SyscallTable::with_defaults().unwrap();
        assert_eq!(table.registered(), SYSCALL_COUNT);
    }

    #[test]
    fn test_args_accessors() {
        let args = SyscallArgs::new(&[5, usize::MAX, (-3i32) as usize]).unwrap();
        assert_eq!(args.pid(0), Ok(5));
        assert_eq!(args.pid(1), Err(KernelError::InvalidArgument));
        assert_eq!(args.code(2), -3);
        assert_eq!(args.get(7), 0);
        assert!(SyscallArgs::new(&[0; MAX_SYSCALL_ARGS + 1]).is_err());
    }
}
