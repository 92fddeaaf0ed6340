//! Multitasker
//!
//! The kernel-facing entry point. Wraps the [`ProcessManager`] in the
//! scheduler spinlock, owns the syscall table and drives the CPU through a
//! [`Processor`].
//!
//! # Locking
//!
//! Every operation takes the lock, mutates the manager and drops the lock
//! before the processor switches stacks or idles. Handlers and the timer
//! path never hold it across a switch.
//!
//! # Blocking
//!
//! An operation that takes the caller off the CPU (join, sleep, stop,
//! exit, self-kill) is followed by a reschedule with
//! `SchedulerEvent::BlockingCall`. When nothing is runnable the processor
//! idles with interrupts enabled until the timer makes something ready.

use alloc::boxed::Box;

use crate::config::constants::MAX_SYSCALL_ARGS;
use crate::config::Config;
use crate::error::{to_status, KResult, KernelError};
use crate::ke::{
    without_interrupts, Dispatch, ProcessState, SchedulerEvent, SpinLock, SpinLockGuard,
};
use crate::ldr::ProgramImage;
use crate::mm::MemoryManager;
use crate::ps::{JoinStatus, Pid, ProcessManager, SpawnRequest, ThreadStart};
use crate::syscall::{user, SyscallTable};

/// The CPU side of a context switch
pub trait Processor: Send + Sync {
    /// Save the state of `prev` (if any) and resume `next`
    ///
    /// Returns when `prev` is dispatched again.
    fn switch(&self, tasker: &Multitasker, prev: Option<Pid>, next: Pid);

    /// Wait for an interrupt with nothing to run
    fn idle(&self, tasker: &Multitasker);
}

/// Process manager, syscall gate and processor
pub struct Multitasker {
    manager: SpinLock<ProcessManager>,
    syscalls: SyscallTable,
    processor: Box<dyn Processor>,
}

impl Multitasker {
    pub fn new(
        config: Config,
        memory: Box<dyn MemoryManager>,
        processor: Box<dyn Processor>,
    ) -> KResult<Self> {
        Ok(Self {
            manager: SpinLock::new(ProcessManager::new(config, memory)?),
            syscalls: SyscallTable::with_defaults()?,
            processor,
        })
    }

    /// Lock the process manager
    ///
    /// The guard must be dropped before anything that may switch.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, ProcessManager> {
        self.manager.lock()
    }

    /// Run `f` with the process manager locked
    pub fn with_manager<R>(&self, f: impl FnOnce(&mut ProcessManager) -> R) -> R {
        f(&mut self.manager.lock())
    }

    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    /// Pid of the running process
    pub fn current_pid(&self) -> KResult<Pid> {
        self.lock().current().ok_or(KernelError::NoSuchProcess)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Pick the next process and switch to it
    ///
    /// Interrupts stay masked from the decision until the switch is done,
    /// so no tick can act on a `current` the CPU is not running yet.
    fn reschedule(&self, event: SchedulerEvent) -> KResult<()> {
        without_interrupts(|| -> KResult<()> {
            let mut event = event;
            loop {
                let decision = self.lock().reschedule(event)?;
                match decision {
                    Dispatch::Continue(_) => return Ok(()),
                    Dispatch::Switch { prev, next } => {
                        self.processor.switch(self, prev, next);
                        return Ok(());
                    }
                    Dispatch::Idle { .. } => {
                        self.processor.idle(self);
                        event = SchedulerEvent::BlockingCall;
                    }
                }
            }
        })
    }

    /// Reschedule if `caller` is no longer running
    fn settle(&self, caller: Pid) -> KResult<()> {
        let state = self.lock().process_state(caller);
        match state {
            Ok(ProcessState::Running) => Ok(()),
            _ => self.reschedule(SchedulerEvent::BlockingCall),
        }
    }

    /// Timer interrupt: account the tick and preempt if due
    pub fn timer_interrupt(&self) -> KResult<()> {
        let preempt = self.lock().tick();
        if preempt {
            self.reschedule(SchedulerEvent::TimerTick)?;
        }
        Ok(())
    }

    /// Give up the rest of the time slice
    pub fn yield_now(&self) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().yield_now(caller)?;
        self.reschedule(SchedulerEvent::VoluntaryYield)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn spawn(&self, request: SpawnRequest) -> KResult<Pid> {
        let caller = self.current_pid()?;
        self.lock().spawn(caller, request)
    }

    pub fn spawn_process(&self, image: ProgramImage, name: &str) -> KResult<Pid> {
        self.spawn(SpawnRequest::process(image, name))
    }

    pub fn spawn_thread(&self, start: ThreadStart, name: &str) -> KResult<Pid> {
        self.spawn(SpawnRequest::thread(start, name))
    }

    /// Wait for `target` to finish; returns its exit code
    pub fn block(&self, target: Pid) -> KResult<i32> {
        let caller = self.current_pid()?;
        let status = self.lock().block(caller, target)?;
        match status {
            JoinStatus::Complete(code) => Ok(code),
            JoinStatus::Blocked => {
                self.reschedule(SchedulerEvent::BlockingCall)?;
                self.lock().take_wait_result(caller)
            }
        }
    }

    pub fn kill(&self, target: Pid, force: bool) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().kill(caller, target, force)?;
        self.settle(caller)
    }

    /// Kill with the configured default force
    pub fn kill_default(&self, target: Pid) -> KResult<()> {
        let force = self.lock().config().default_kill_force;
        self.kill(target, force)
    }

    /// Terminate the running process
    ///
    /// On hardware this never returns; a hosted processor returns once the
    /// switch away from the finished process completes.
    pub fn exit(&self, code: i32) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().exit(caller, code)?;
        self.reschedule(SchedulerEvent::BlockingCall)
    }

    /// Sleep for `ticks`; zero yields
    pub fn sleep(&self, ticks: u64) -> KResult<()> {
        if ticks == 0 {
            return self.yield_now();
        }
        let caller = self.current_pid()?;
        self.lock().sleep(caller, ticks)?;
        self.reschedule(SchedulerEvent::BlockingCall)
    }

    pub fn stop(&self, target: Pid) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().stop(caller, target)?;
        self.settle(caller)
    }

    pub fn resume(&self, target: Pid) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().resume(caller, target)
    }

    pub fn detach(&self, target: Pid) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().detach(caller, target)
    }

    /// Wait for a device completion
    pub fn wait_for_io(&self) -> KResult<()> {
        let caller = self.current_pid()?;
        self.lock().wait_for_io(caller)?;
        self.reschedule(SchedulerEvent::BlockingCall)
    }

    /// Device completion for `pid`; called from interrupt context
    pub fn complete_io(&self, pid: Pid) -> KResult<()> {
        self.lock().complete_io(pid)
    }

    // ------------------------------------------------------------------
    // Syscalls
    // ------------------------------------------------------------------

    /// Run a syscall for the current process
    pub fn syscall(&self, function: usize, args: &[usize]) -> KResult<isize> {
        let (caller, privilege) = {
            let pm = self.lock();
            let caller = pm.current().ok_or(KernelError::NoSuchProcess)?;
            (caller, pm.get_privilege(caller)?)
        };
        self.syscalls.dispatch(self, caller, privilege, function, args)
    }

    /// Decode a syscall frame and run it; returns the status word
    ///
    /// # Safety
    /// `sp` must point at a syscall frame in the caller's memory.
    pub unsafe fn syscall_from_stack(&self, sp: *const usize) -> isize {
        to_status(self.decode_and_dispatch(sp))
    }

    unsafe fn decode_and_dispatch(&self, sp: *const usize) -> KResult<isize> {
        let sp = sp as usize;
        let argc: usize = user::copy_from_user(sp)?;
        if argc == 0 || argc - 1 > MAX_SYSCALL_ARGS {
            return Err(KernelError::ArgumentCount);
        }
        let frame = user::copy_slice_from_user::<usize>(sp + 8, argc)?;
        self.syscall(frame[0], &frame[1..])
    }
}

/// The kernel's multitasker
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
static KERNEL: spin::Once<Multitasker> = spin::Once::new();

/// Bring up the multitasker on hardware
///
/// The calling context becomes the kernel process (pid 0).
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn init(config: Config, memory: Box<dyn MemoryManager>) -> KResult<&'static Multitasker> {
    crate::logger::init(config.log_level);
    let tasker = Multitasker::new(
        config,
        memory,
        Box::new(crate::arch::x86_64::HardwareProcessor),
    )?;
    let tasker = KERNEL.call_once(|| tasker);
    log::info!(target: "multitasker", "multitasking enabled");
    Ok(tasker)
}

/// The global multitasker, once [`init`] has run
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn kernel() -> Option<&'static Multitasker> {
    KERNEL.get()
}
