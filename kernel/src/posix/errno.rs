//! POSIX error numbers

use crate::error::KernelError;

pub const EPERM: i32 = 1;
pub const ESRCH: i32 = 3;
pub const EIO: i32 = 5;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EINVAL: i32 = 22;
pub const EDEADLK: i32 = 35;
pub const ENOSYS: i32 = 38;

/// errno for a kernel error
///
/// `Already` and `Bug` have no POSIX counterpart; the wrappers that can
/// see `Already` decide what it means themselves.
pub const fn errno_for(error: KernelError) -> i32 {
    match error {
        KernelError::NoSuchProcess => ESRCH,
        KernelError::NoFree => EAGAIN,
        KernelError::Permission => EPERM,
        KernelError::Deadlock => EDEADLK,
        KernelError::ArgumentCount | KernelError::InvalidArgument | KernelError::Already => EINVAL,
        KernelError::NullParameter | KernelError::BadAddress => EFAULT,
        KernelError::OutOfMemory => ENOMEM,
        KernelError::NoSuchFunction => ENOSYS,
        KernelError::Bug => EIO,
    }
}

/// errno for a raw syscall status; `None` for success
pub fn errno_for_status(status: isize) -> Option<i32> {
    if status >= 0 {
        return None;
    }
    Some(KernelError::from_code(status).map(errno_for).unwrap_or(EIO))
}
