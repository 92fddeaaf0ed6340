//! Kernel syscall handlers
//!
//! Each handler decodes its words, performs the operation through the
//! multitasker and returns the non-negative result word.

use alloc::string::String;
use alloc::vec::Vec;

use x86_64::VirtAddr;

use super::user;
use super::{
    SpawnFlags, SpawnParams, SyscallArgs, SyscallHandler, SyscallNumber, UserStr, SPAWN_DEFAULT,
};
use crate::error::{KResult, KernelError};
use crate::ldr::{ImageRegion, ProgramImage};
use crate::multitasker::Multitasker;
use crate::ps::{Pid, Privilege, ProcessInfo, SpawnRequest, ThreadStart};

/// Every handler the kernel registers at boot: (function, handler, arity)
pub const DEFAULT_HANDLERS: &[(SyscallNumber, SyscallHandler, usize)] = &[
    (SyscallNumber::Exit, sys_exit, 1),
    (SyscallNumber::Yield, sys_yield, 0),
    (SyscallNumber::Spawn, sys_spawn, 1),
    (SyscallNumber::SpawnThread, sys_spawn_thread, 2),
    (SyscallNumber::Block, sys_block, 2),
    (SyscallNumber::Kill, sys_kill, 2),
    (SyscallNumber::KillDefault, sys_kill_default, 1),
    (SyscallNumber::GetPid, sys_get_pid, 0),
    (SyscallNumber::GetParentPid, sys_get_parent_pid, 0),
    (SyscallNumber::Sleep, sys_sleep, 1),
    (SyscallNumber::Stop, sys_stop, 1),
    (SyscallNumber::Resume, sys_resume, 1),
    (SyscallNumber::Detach, sys_detach, 1),
    (SyscallNumber::ListProcesses, sys_list_processes, 2),
    (SyscallNumber::GetProcessInfo, sys_get_process_info, 2),
    (SyscallNumber::GetPrivilege, sys_get_privilege, 1),
    (SyscallNumber::SetPrivilege, sys_set_privilege, 2),
    (SyscallNumber::GetPriority, sys_get_priority, 1),
    (SyscallNumber::SetPriority, sys_set_priority, 2),
];

// ============================================================================
// Lifecycle
// ============================================================================

/// exit(code)
fn sys_exit(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.exit(args.code(0))?;
    Ok(0)
}

/// yield()
fn sys_yield(tasker: &Multitasker, _caller: Pid, _args: &SyscallArgs) -> KResult<isize> {
    tasker.yield_now()?;
    Ok(0)
}

/// spawn(params: *const SpawnParams) -> pid
fn sys_spawn(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    // SAFETY: the probe validates the range; the caller's space is active.
    let params: SpawnParams = unsafe { user::copy_from_user(args.get(0))? };
    let max_args = tasker.lock().config().max_args;
    if params.argc > max_args {
        return Err(KernelError::ArgumentCount);
    }
    let request = unsafe { spawn_request(&params)? };
    tasker.spawn(request).map(|pid| pid as isize)
}

/// Build a spawn request from a user argument block
unsafe fn spawn_request(params: &SpawnParams) -> KResult<SpawnRequest> {
    let name = read_str(params.name)?;
    let mut argv = Vec::with_capacity(params.argc);
    for arg in user::copy_slice_from_user::<UserStr>(params.argv, params.argc)? {
        argv.push(read_str(arg)?);
    }

    let entry = VirtAddr::try_new(params.entry as u64).map_err(|_| KernelError::BadAddress)?;
    let code_base =
        VirtAddr::try_new(params.code_base as u64).map_err(|_| KernelError::BadAddress)?;
    let image = ProgramImage::from_entry(entry)
        .with_regions(ImageRegion::new(code_base, params.code_size), ImageRegion::empty())
        .with_args(argv);

    let flags = SpawnFlags::from_bits(params.flags).ok_or(KernelError::InvalidArgument)?;
    let mut request = SpawnRequest::process(image, &name);
    if params.privilege != SPAWN_DEFAULT {
        let privilege =
            Privilege::from_raw(params.privilege).ok_or(KernelError::InvalidArgument)?;
        request = request.privilege(privilege);
    }
    if params.priority != SPAWN_DEFAULT {
        let priority = u8::try_from(params.priority).map_err(|_| KernelError::InvalidArgument)?;
        request = request.priority(priority);
    }
    if flags.contains(SpawnFlags::STOPPED) {
        request = request.stopped();
    }
    if flags.contains(SpawnFlags::TRUSTED) {
        request = request.trusted();
    }
    Ok(request)
}

unsafe fn read_str(s: UserStr) -> KResult<String> {
    user::read_user_str(s.ptr, s.len)
}

/// spawn_thread(routine, argument) -> pid
///
/// The thread is named after its parent and its own pid.
fn sys_spawn_thread(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let start = ThreadStart {
        routine: args.get(0),
        argument: args.get(1),
    };
    tasker.spawn_thread(start, "").map(|pid| pid as isize)
}

/// block(pid, code: *mut i32)
///
/// The exit code of `pid` is stored through `code` (skipped when null); the
/// status word only reports success or failure, so every exit code,
/// negative ones included, reaches the joiner intact.
fn sys_block(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let target = args.pid(0)?;
    let out = args.get(1);
    if out != 0 {
        user::probe_typed::<i32>(out)?;
    }
    let code = tasker.block(target)?;
    if out != 0 {
        // SAFETY: probed above
        unsafe { user::copy_to_user(out, &code)? };
    }
    Ok(0)
}

/// kill(pid, force)
fn sys_kill(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.kill(args.pid(0)?, args.flag(1))?;
    Ok(0)
}

/// kill_default(pid)
fn sys_kill_default(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.kill_default(args.pid(0)?)?;
    Ok(0)
}

// ============================================================================
// Identity
// ============================================================================

fn sys_get_pid(_tasker: &Multitasker, caller: Pid, _args: &SyscallArgs) -> KResult<isize> {
    Ok(caller as isize)
}

/// getppid() -> parent pid; `NoSuchProcess` for a parentless process
fn sys_get_parent_pid(tasker: &Multitasker, caller: Pid, _args: &SyscallArgs) -> KResult<isize> {
    let parent = tasker.lock().parent_of(caller)?;
    parent
        .map(|pid| pid as isize)
        .ok_or(KernelError::NoSuchProcess)
}

// ============================================================================
// Scheduling control
// ============================================================================

/// sleep(ticks)
fn sys_sleep(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.sleep(args.get(0) as u64)?;
    Ok(0)
}

fn sys_stop(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.stop(args.pid(0)?)?;
    Ok(0)
}

fn sys_resume(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.resume(args.pid(0)?)?;
    Ok(0)
}

fn sys_detach(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    tasker.detach(args.pid(0)?)?;
    Ok(0)
}

// ============================================================================
// Introspection
// ============================================================================

/// list_processes(buffer: *mut ProcessInfo, capacity) -> entries written
fn sys_list_processes(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let (buffer, capacity) = (args.get(0), args.get(1));
    let list = tasker.lock().list_processes();
    let count = list.len().min(capacity);
    // SAFETY: probed by copy_slice_to_user
    unsafe { user::copy_slice_to_user::<ProcessInfo>(buffer, &list[..count])? };
    Ok(count as isize)
}

/// get_process_info(pid, buffer: *mut ProcessInfo)
fn sys_get_process_info(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let info = tasker.lock().process_info(args.pid(0)?)?;
    // SAFETY: probed by copy_to_user
    unsafe { user::copy_to_user(args.get(1), &info)? };
    Ok(0)
}

fn sys_get_privilege(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let privilege = tasker.lock().get_privilege(args.pid(0)?)?;
    Ok(privilege as isize)
}

fn sys_set_privilege(tasker: &Multitasker, caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let privilege = Privilege::from_raw(args.get(1)).ok_or(KernelError::InvalidArgument)?;
    tasker.lock().set_privilege(caller, args.pid(0)?, privilege)?;
    Ok(0)
}

fn sys_get_priority(tasker: &Multitasker, _caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let priority = tasker.lock().get_priority(args.pid(0)?)?;
    Ok(priority as isize)
}

fn sys_set_priority(tasker: &Multitasker, caller: Pid, args: &SyscallArgs) -> KResult<isize> {
    let priority = u8::try_from(args.get(1)).map_err(|_| KernelError::InvalidArgument)?;
    tasker.lock().set_priority(caller, args.pid(0)?, priority)?;
    Ok(0)
}
