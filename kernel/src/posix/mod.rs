//! POSIX thread emulation
//!
//! pthreads built from process syscalls alone; there is no kernel thread
//! object:
//!
//! | Call             | Syscall                   |
//! |------------------|---------------------------|
//! | `pthread_create` | `SpawnThread`             |
//! | `pthread_join`   | `Block`                   |
//! | `pthread_cancel` | `Kill` with force         |
//! | `pthread_self`   | `GetPid`                  |
//! | `pthread_detach` | `Detach`                  |
//! | `pthread_exit`   | `Exit`                    |
//!
//! Failures come back as POSIX error numbers, the way the C library
//! reports them.

pub mod errno;

use crate::syscall::SyscallNumber;

pub use errno::errno_for_status;

/// Thread handle: the thread's pid
pub type PthreadT = u32;

/// Start routine; its return value becomes the thread's exit code
pub type StartRoutine = extern "C" fn(usize) -> isize;

/// Something that can issue a syscall and return its status word
pub trait SyscallInvoker {
    fn invoke(&self, number: SyscallNumber, args: &[usize]) -> isize;
}

/// Run a syscall, turning a negative status into an errno
fn call(sys: &impl SyscallInvoker, number: SyscallNumber, args: &[usize]) -> Result<isize, i32> {
    let status = sys.invoke(number, args);
    match errno_for_status(status) {
        None => Ok(status),
        Some(errno) => Err(errno),
    }
}

/// Start `routine(argument)` in a new thread of the calling process
pub fn pthread_create(
    sys: &impl SyscallInvoker,
    routine: StartRoutine,
    argument: usize,
) -> Result<PthreadT, i32> {
    let pid = call(sys, SyscallNumber::SpawnThread, &[routine as usize, argument])?;
    Ok(pid as PthreadT)
}

/// Wait for `thread` and return its exit code
pub fn pthread_join(sys: &impl SyscallInvoker, thread: PthreadT) -> Result<i32, i32> {
    let mut code: i32 = 0;
    call(
        sys,
        SyscallNumber::Block,
        &[thread as usize, &mut code as *mut i32 as usize],
    )?;
    Ok(code)
}

/// Terminate `thread`; cancelling a thread that already finished succeeds
pub fn pthread_cancel(sys: &impl SyscallInvoker, thread: PthreadT) -> Result<(), i32> {
    let status = sys.invoke(SyscallNumber::Kill, &[thread as usize, 1]);
    if status == crate::error::KernelError::Already.status() {
        return Ok(());
    }
    match errno_for_status(status) {
        None => Ok(()),
        Some(errno) => Err(errno),
    }
}

pub fn pthread_self(sys: &impl SyscallInvoker) -> PthreadT {
    sys.invoke(SyscallNumber::GetPid, &[]) as PthreadT
}

pub fn pthread_detach(sys: &impl SyscallInvoker, thread: PthreadT) -> Result<(), i32> {
    call(sys, SyscallNumber::Detach, &[thread as usize]).map(|_| ())
}

/// Terminate the calling thread with `code`
///
/// Does not return on hardware.
pub fn pthread_exit(sys: &impl SyscallInvoker, code: i32) {
    sys.invoke(SyscallNumber::Exit, &[code as usize]);
}

#[cfg(test)]
mod tests {
    use super::errno::*;
    use super::*;
    use crate::ke::ProcessState;
    use crate::ps::{EXIT_CODE_KILLED, KERNEL_PID};
    use crate::testing::{tasker, DirectInvoker};

    extern "C" fn returns_seven(_: usize) -> isize {
        7
    }

    extern "C" fn doubles(argument: usize) -> isize {
        (argument * 2) as isize
    }

    #[test]
    fn test_create_join_returns_seven() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);

        let thread = pthread_create(&sys, returns_seven, 0).unwrap();
        assert_eq!(
            mt.lock().table().get(KERNEL_PID).unwrap().descendant_threads,
            1
        );
        assert_eq!(pthread_join(&sys, thread), Ok(7));
        assert_eq!(
            mt.lock().table().get(KERNEL_PID).unwrap().descendant_threads,
            0
        );
    }

    #[test]
    fn test_argument_passed_by_value() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let thread = pthread_create(&sys, doubles, 21).unwrap();
        assert_eq!(pthread_join(&sys, thread), Ok(42));
    }

    extern "C" fn returns_minus_three(_: usize) -> isize {
        -3
    }

    #[test]
    fn test_join_negative_exit_code() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let thread = pthread_create(&sys, returns_minus_three, 0).unwrap();
        assert_eq!(pthread_join(&sys, thread), Ok(-3));
    }

    #[test]
    fn test_join_cancelled_thread() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let thread = pthread_create(&sys, returns_seven, 0).unwrap();
        assert_eq!(pthread_cancel(&sys, thread), Ok(()));
        assert_eq!(pthread_join(&sys, thread), Ok(EXIT_CODE_KILLED));
        assert_eq!(
            mt.lock().table().get(KERNEL_PID).unwrap().descendant_threads,
            0
        );
    }

    #[test]
    fn test_self_join_is_edeadlk() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let me = pthread_self(&sys);
        assert_eq!(me, KERNEL_PID);
        assert_eq!(pthread_join(&sys, me), Err(EDEADLK));
        assert_eq!(mt.lock().process_state(me), Ok(ProcessState::Running));
    }

    #[test]
    fn test_cancel_finished_thread_succeeds() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let thread = pthread_create(&sys, returns_seven, 0).unwrap();
        assert_eq!(pthread_join(&sys, thread), Ok(7));
        assert_eq!(pthread_cancel(&sys, thread), Ok(()));
        assert_eq!(pthread_cancel(&sys, 250), Err(ESRCH));
    }

    #[test]
    fn test_detach_twice() {
        let mt = tasker();
        let sys = DirectInvoker::new(&mt);
        let thread = pthread_create(&sys, returns_seven, 0).unwrap();
        assert_eq!(pthread_detach(&sys, thread), Ok(()));
        assert_eq!(pthread_detach(&sys, thread), Err(EINVAL));
    }
}
