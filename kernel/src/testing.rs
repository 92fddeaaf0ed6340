//! Host test support
//!
//! - [`FakeMemory`]: counting memory manager
//! - [`SimProcessor`]: runs a thread's start routine on its first dispatch
//!   and exits it with the return value; every other switch hands control
//!   straight back to the test. Each switch is recorded in a [`SwitchLog`]
//! - [`DirectInvoker`]: lays out a syscall frame and enters the gate

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use x86_64::VirtAddr;

use crate::config::Config;
use crate::ke::{interrupts_enabled, ProcessState, SchedulerEvent, ThreadContext};
use crate::ldr::ProgramImage;
use crate::mm::{AddressSpaceId, MemoryManager};
use crate::multitasker::{Multitasker, Processor};
use crate::posix::{StartRoutine, SyscallInvoker};
use crate::ps::{Pcb, Pid, Privilege, ProcessFlags, ProcessManager, ProcessName, ProcessType, KERNEL_PID};
use crate::syscall::SyscallNumber;

/// PCB with every field at its zero value
pub fn blank_pcb(pid: Pid) -> Pcb {
    Pcb {
        pid,
        name: ProcessName::new("blank"),
        uid: 0,
        process_type: ProcessType::Normal,
        priority: 0,
        privilege: Privilege::User,
        parent: None,
        descendant_threads: 0,
        state: ProcessState::Ready,
        flags: ProcessFlags::empty(),
        context: ThreadContext::new(),
        stack: None,
        stack_size: 0,
        address_space: AddressSpaceId(1),
        fd_table: 0,
        argv: Vec::new(),
        thread_start: None,
        wait: None,
        wait_result: None,
        wake_tick: None,
        slice_left: 0,
        queue_class: 0,
        ready_since: 0,
        cpu_time: 0,
        window_cpu: 0,
        cpu_percent: 0,
        created_tick: 0,
        exit_code: None,
    }
}

/// Counters shared between a [`FakeMemory`] and the test that built it
#[derive(Debug, Default)]
pub struct MemoryStats {
    allocations: AtomicUsize,
    spaces: AtomicUsize,
}

impl MemoryStats {
    pub fn live_allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.load(Ordering::SeqCst)
    }
}

/// Memory manager handing out fake addresses
pub struct FakeMemory {
    stats: Arc<MemoryStats>,
    next_address: AtomicU64,
    next_space: AtomicU32,
    space_limit: usize,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MemoryStats::default()),
            next_address: AtomicU64::new(0x1000_0000),
            next_space: AtomicU32::new(1),
            space_limit: usize::MAX,
        }
    }

    /// Refuse address spaces beyond `limit` live ones
    pub fn with_space_limit(mut self, limit: usize) -> Self {
        self.space_limit = limit;
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }
}

impl MemoryManager for FakeMemory {
    fn allocate(&self, size: usize) -> Option<VirtAddr> {
        let size = (size as u64 + 0xfff) & !0xfff;
        let base = self.next_address.fetch_add(size, Ordering::SeqCst);
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        Some(VirtAddr::new(base))
    }

    fn release(&self, _address: VirtAddr) {
        self.stats.allocations.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_address_space(&self) -> Option<AddressSpaceId> {
        if self.stats.live_spaces() >= self.space_limit {
            return None;
        }
        self.stats.spaces.fetch_add(1, Ordering::SeqCst);
        Some(AddressSpaceId(self.next_space.fetch_add(1, Ordering::SeqCst)))
    }

    fn destroy_address_space(&self, _space: AddressSpaceId) {
        self.stats.spaces.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Idle calls tolerated before a test is declared hung
const IDLE_LIMIT: usize = 10_000;

/// What a [`SimProcessor`] observed
#[derive(Debug, Default)]
pub struct SwitchLog {
    switches: AtomicUsize,
    /// Switches entered with interrupts enabled
    unmasked: AtomicUsize,
}

impl SwitchLog {
    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    pub fn unmasked(&self) -> usize {
        self.unmasked.load(Ordering::SeqCst)
    }
}

/// Processor for host tests
pub struct SimProcessor {
    started: spin::Mutex<BTreeSet<Pid>>,
    idles: AtomicUsize,
    log: Arc<SwitchLog>,
}

impl SimProcessor {
    pub fn new() -> Self {
        Self {
            started: spin::Mutex::new(BTreeSet::new()),
            idles: AtomicUsize::new(0),
            log: Arc::new(SwitchLog::default()),
        }
    }

    pub fn log(&self) -> Arc<SwitchLog> {
        self.log.clone()
    }
}

impl Processor for SimProcessor {
    fn switch(&self, tasker: &Multitasker, _prev: Option<Pid>, next: Pid) {
        self.log.switches.fetch_add(1, Ordering::SeqCst);
        if interrupts_enabled() {
            self.log.unmasked.fetch_add(1, Ordering::SeqCst);
        }
        let start = tasker.lock().table().get(next).and_then(|pcb| pcb.thread_start);
        let Some(start) = start else {
            return;
        };
        if !self.started.lock().insert(next) {
            return;
        }
        // SAFETY: tests only spawn threads with real `StartRoutine`s
        let routine: StartRoutine = unsafe { core::mem::transmute(start.routine) };
        let code = routine(start.argument);
        tasker.exit(code as i32).unwrap();
    }

    fn idle(&self, tasker: &Multitasker) {
        if self.idles.fetch_add(1, Ordering::SeqCst) >= IDLE_LIMIT {
            panic!("idle with nothing left to wake");
        }
        tasker.timer_interrupt().unwrap();
    }
}

pub fn program() -> ProgramImage {
    ProgramImage::from_entry(VirtAddr::new(0x40_0000))
}

pub fn manager() -> ProcessManager {
    manager_with(Config::new())
}

pub fn manager_with(config: Config) -> ProcessManager {
    ProcessManager::new(config, Box::new(FakeMemory::new())).unwrap()
}

/// Spawn a ready `Normal` process owned by the kernel process
pub fn spawn_normal(pm: &mut ProcessManager, name: &str) -> Pid {
    pm.spawn_process(KERNEL_PID, program(), name).unwrap()
}

/// Reschedule until `pid` is running
pub fn run(pm: &mut ProcessManager, pid: Pid) {
    for _ in 0..pm.table().capacity() * 2 {
        let event = match pm.current() {
            Some(cur) if cur == pid => return,
            Some(_) => SchedulerEvent::VoluntaryYield,
            None => SchedulerEvent::BlockingCall,
        };
        pm.reschedule(event).unwrap();
    }
    panic!("pid {} never dispatched", pid);
}

pub fn tasker() -> Multitasker {
    tasker_with(Config::new())
}

pub fn tasker_with(config: Config) -> Multitasker {
    logged_tasker(config).0
}

/// Multitasker plus the log of its processor's switches
pub fn logged_tasker(config: Config) -> (Multitasker, Arc<SwitchLog>) {
    let processor = SimProcessor::new();
    let log = processor.log();
    let tasker =
        Multitasker::new(config, Box::new(FakeMemory::new()), Box::new(processor)).unwrap();
    (tasker, log)
}

/// Enter the gate with `[argc, function, args...]` on a fake user stack
pub fn invoke(tasker: &Multitasker, function: usize, args: &[usize]) -> isize {
    let mut frame = Vec::with_capacity(args.len() + 2);
    frame.push(args.len() + 1);
    frame.push(function);
    frame.extend_from_slice(args);
    unsafe { tasker.syscall_from_stack(frame.as_ptr()) }
}

/// Syscall invoker for library code under test
pub struct DirectInvoker<'a> {
    tasker: &'a Multitasker,
}

impl<'a> DirectInvoker<'a> {
    pub fn new(tasker: &'a Multitasker) -> Self {
        Self { tasker }
    }
}

impl SyscallInvoker for DirectInvoker<'_> {
    fn invoke(&self, number: SyscallNumber, args: &[usize]) -> isize {
        invoke(self.tasker, number as usize, args)
    }
}
