//! Kernel status codes
//!
//! Every layer of the process manager reports failure the same way: a small
//! negative integer. Inside the kernel these travel as [`KernelError`] in a
//! [`KResult`]; at the syscall boundary they are flattened to `isize` with
//! [`KernelError::status`], and library wrappers turn them back with
//! [`KernelError::from_code`].
//!
//! # Codes
//!
//! | Code | Error            | Raised by                                   |
//! |------|------------------|---------------------------------------------|
//! | -1   | NoSuchProcess    | lookups of unknown pids                     |
//! | -2   | NoFree           | descriptor table exhausted                  |
//! | -3   | Permission       | privilege violations                        |
//! | -4   | Deadlock         | self-join or a join that closes a cycle     |
//! | -5   | ArgumentCount    | syscall arity, argv capacity                |
//! | -6   | InvalidArgument  | malformed values                            |
//! | -7   | Already          | redundant operations                        |
//! | -8   | Bug              | illegal state transitions                   |
//! | -9   | NoSuchFunction   | syscall number out of range                 |
//! | -10  | NullParameter    | null entry points and pointers              |
//! | -11  | BadAddress       | user pointers outside user space            |
//! | -12  | OutOfMemory      | memory collaborator refused an allocation   |

use core::fmt;

/// Kernel error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum KernelError {
    /// No process with the requested pid
    NoSuchProcess = -1,
    /// Descriptor table is full
    NoFree = -2,
    /// Caller lacks the privilege for the operation
    Permission = -3,
    /// Operation would wait forever
    Deadlock = -4,
    /// Wrong number of arguments
    ArgumentCount = -5,
    /// Argument value out of range or malformed
    InvalidArgument = -6,
    /// Operation already performed
    Already = -7,
    /// Kernel invariant violated
    Bug = -8,
    /// Syscall number has no handler
    NoSuchFunction = -9,
    /// Required pointer or entry point was null
    NullParameter = -10,
    /// Pointer does not reference user memory
    BadAddress = -11,
    /// Memory allocation failed
    OutOfMemory = -12,
}

/// Result type used throughout the process manager
pub type KResult<T> = Result<T, KernelError>;

impl KernelError {
    /// All error codes, in code order
    pub const ALL: [KernelError; 12] = [
        KernelError::NoSuchProcess,
        KernelError::NoFree,
        KernelError::Permission,
        KernelError::Deadlock,
        KernelError::ArgumentCount,
        KernelError::InvalidArgument,
        KernelError::Already,
        KernelError::Bug,
        KernelError::NoSuchFunction,
        KernelError::NullParameter,
        KernelError::BadAddress,
        KernelError::OutOfMemory,
    ];

    /// Numeric code (always negative)
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Code widened to a syscall return word
    #[inline]
    pub const fn status(self) -> isize {
        self as i32 as isize
    }

    /// Map a numeric code back to an error
    pub fn from_code(code: isize) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.status() == code)
    }

    /// Human-readable description
    pub const fn message(self) -> &'static str {
        match self {
            KernelError::NoSuchProcess => "no such process",
            KernelError::NoFree => "no free resources",
            KernelError::Permission => "permission denied",
            KernelError::Deadlock => "resource deadlock avoided",
            KernelError::ArgumentCount => "wrong number of arguments",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::Already => "operation already performed",
            KernelError::Bug => "kernel bug: illegal state transition",
            KernelError::NoSuchFunction => "no such function",
            KernelError::NullParameter => "null parameter",
            KernelError::BadAddress => "bad address",
            KernelError::OutOfMemory => "out of memory",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Flatten a handler result into a syscall return word
#[inline]
pub fn to_status(result: KResult<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(e) => e.status(),
    }
}

/// Generic status-to-string mapping used by command-line tools
pub fn error_message(status: isize) -> &'static str {
    if status >= 0 {
        return "success";
    }
    match KernelError::from_code(status) {
        Some(e) => e.message(),
        None => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_small_and_negative() {
        for e in KernelError::ALL {
            assert!(e.code() < 0 && e.code() > -64, "{:?}", e);
        }
    }

    #[test]
    fn test_from_code() {
        assert_eq!(KernelError::from_code(-4), Some(KernelError::Deadlock));
        assert_eq!(KernelError::from_code(-7), Some(KernelError::Already));
        assert_eq!(KernelError::from_code(0), None);
        assert_eq!(KernelError::from_code(-1000), None);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(0), "success");
        assert_eq!(error_message(17), "success");
        assert_eq!(error_message(KernelError::NoSuchProcess.status()), "no such process");
        assert_eq!(error_message(-99), "unknown error");
    }

    #[test]
    fn test_to_status() {
        assert_eq!(to_status(Ok(5)), 5);
        assert_eq!(to_status(Err(KernelError::Permission)), -3);
    }
}
