//! Process manager
//!
//! Owns the descriptor table, the ready queues and the scheduling clock. It
//! is a plain state machine: every operation takes the acting pid
//! explicitly and reports what the CPU should do next, but never switches
//! stacks itself. `Multitasker` wraps it in the global spinlock and performs
//! the switches.
//!
//! Spawning lives in `create`, blocking and termination in `lifecycle`,
//! queries in `info`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use super::pcb::{
    Pcb, Pid, Privilege, ProcessFlags, ProcessName, ProcessType, ThreadStart, KERNEL_PID,
};
use super::table::ProcessTable;
use crate::config::Config;
use crate::error::{KResult, KernelError};
use crate::ke::{transition, Dispatch, ProcessState, ReadyQueues, SchedulerEvent, ThreadContext};
use crate::mm::{AddressSpaceId, MemoryManager};

/// Scheduler counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub context_switches: u64,
    pub preemptions: u64,
    pub idle_ticks: u64,
    pub reaped: u64,
}

/// Process manager state, guarded by the multitasker lock
pub struct ProcessManager {
    pub(super) config: Config,
    pub(super) table: ProcessTable,
    pub(super) ready: ReadyQueues,
    /// Process in `Running`, if any
    pub(super) current: Option<Pid>,
    /// Process whose stack the CPU is on; survives idling
    pub(super) on_cpu: Option<Pid>,
    pub(super) ticks: u64,
    pub(super) memory: Box<dyn MemoryManager>,
    /// PCBs referencing each address space
    pub(super) space_refs: BTreeMap<AddressSpaceId, u32>,
    pub(super) next_fd_table: u32,
    pub(super) stats: SchedulerStats,
}

impl ProcessManager {
    /// Create the manager with the kernel process (pid 0) running
    pub fn new(config: Config, memory: Box<dyn MemoryManager>) -> KResult<Self> {
        config.validate()?;

        let mut manager = Self {
            config,
            table: ProcessTable::new(config.max_processes),
            ready: ReadyQueues::new(config.priority_levels),
            current: None,
            on_cpu: None,
            ticks: 0,
            memory,
            space_refs: BTreeMap::new(),
            next_fd_table: 1,
            stats: SchedulerStats::default(),
        };

        let kernel = Pcb {
            pid: KERNEL_PID,
            name: ProcessName::new("kernel"),
            uid: 0,
            process_type: ProcessType::Normal,
            priority: config.default_priority,
            privilege: Privilege::Supervisor,
            parent: None,
            descendant_threads: 0,
            state: ProcessState::Running,
            flags: ProcessFlags::TRUSTED,
            context: ThreadContext::new(),
            stack: None,
            stack_size: 0,
            address_space: AddressSpaceId::KERNEL,
            fd_table: 0,
            argv: alloc::vec::Vec::new(),
            thread_start: None,
            wait: None,
            wait_result: None,
            wake_tick: None,
            slice_left: config.time_slice,
            queue_class: config.default_priority,
            ready_since: 0,
            cpu_time: 0,
            window_cpu: 0,
            cpu_percent: 0,
            created_tick: 0,
            exit_code: None,
        };
        manager.table.install(kernel)?;
        manager.space_refs.insert(AddressSpaceId::KERNEL, 1);
        manager.current = Some(KERNEL_PID);
        manager.on_cpu = Some(KERNEL_PID);

        log::info!(
            target: "ps",
            "process manager up: {} slots, {} priority classes, slice {} ticks",
            config.max_processes,
            config.priority_levels,
            config.time_slice
        );
        Ok(manager)
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pid of the running process
    #[inline]
    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Ticks since boot
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    #[inline]
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Number of PCBs waiting in ready queues
    #[inline]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Saved context of a PCB, for the context switch
    ///
    /// The pointer stays valid while the slot is occupied; PCBs are boxed
    /// and never move.
    pub fn context_ptr(&mut self, pid: Pid) -> Option<*mut ThreadContext> {
        self.table
            .get_mut(pid)
            .map(|pcb| &mut pcb.context as *mut ThreadContext)
    }

    /// Clear the never-dispatched mark of `pid`, returning whether it was set
    pub fn take_fresh(&mut self, pid: Pid) -> bool {
        match self.table.get_mut(pid) {
            Some(pcb) if pcb.flags.contains(ProcessFlags::FRESH) => {
                pcb.flags.remove(ProcessFlags::FRESH);
                true
            }
            _ => false,
        }
    }

    /// Start context of a `Thread` PCB
    pub fn thread_start(&self, pid: Pid) -> Option<ThreadStart> {
        self.table.get(pid).and_then(|pcb| pcb.thread_start)
    }

    /// References held on an address space
    pub fn address_space_refs(&self, space: AddressSpaceId) -> u32 {
        self.space_refs.get(&space).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Move `pid` into a ready queue
    ///
    /// `io` marks an unblock caused by device completion: the PCB becomes
    /// `IoReady` and is queued `io_boost` classes more urgent for its next
    /// dispatch only.
    pub(super) fn make_ready(&mut self, pid: Pid, io: bool) -> KResult<()> {
        let now = self.ticks;
        let boost = self.config.io_boost;
        let pcb = self.table.lookup_mut(pid)?;

        let to = if io { ProcessState::IoReady } else { ProcessState::Ready };
        transition(pid, &mut pcb.state, to)?;
        pcb.wait = None;
        pcb.wake_tick = None;

        let class = if io {
            pcb.flags.insert(ProcessFlags::IO_BOOST);
            pcb.priority.saturating_sub(boost)
        } else {
            pcb.priority
        };
        let class = self.ready.class_of(class);
        pcb.queue_class = class;
        pcb.ready_since = now;

        if self.current == Some(pid) {
            self.current = None;
        }
        self.ready.enqueue(pid, class);
        Ok(())
    }

    /// Put `pid` on the CPU
    fn dispatch(&mut self, pid: Pid) -> KResult<()> {
        let slice = self.config.time_slice;
        let pcb = self.table.lookup_mut(pid)?;
        transition(pid, &mut pcb.state, ProcessState::Running)?;
        pcb.flags.remove(ProcessFlags::IO_BOOST);
        pcb.slice_left = slice;
        pcb.queue_class = pcb.priority;

        if self.on_cpu != Some(pid) {
            self.stats.context_switches += 1;
        }
        self.current = Some(pid);
        self.on_cpu = Some(pid);
        log::trace!(target: "ke::sched", "dispatch pid {}", pid);
        Ok(())
    }

    /// Decide what runs next
    ///
    /// The one place both preemption and voluntary switches go through.
    /// `BlockingCall` expects the current process to have already left
    /// `Running`; a process still running at that point is a kernel bug.
    pub fn reschedule(&mut self, event: SchedulerEvent) -> KResult<Dispatch> {
        let prev = self.on_cpu;

        if let Some(cur) = self.current {
            let (state, slice_left, priority) = {
                let pcb = self.table.lookup(cur)?;
                (pcb.state, pcb.slice_left, pcb.priority)
            };

            if state == ProcessState::Running {
                match event {
                    SchedulerEvent::TimerTick => {
                        let more_urgent =
                            self.ready.highest_class().is_some_and(|class| class < priority);
                        if slice_left > 0 && !more_urgent {
                            return Ok(Dispatch::Continue(cur));
                        }
                        self.stats.preemptions += 1;
                        self.make_ready(cur, false)?;
                    }
                    SchedulerEvent::VoluntaryYield => self.make_ready(cur, false)?,
                    SchedulerEvent::BlockingCall => {
                        log::error!(
                            target: "ke::sched",
                            "BUG: pid {} rescheduled for a blocking call while running",
                            cur
                        );
                        return Err(KernelError::Bug);
                    }
                }
            } else {
                self.current = None;
            }
        }

        match self.ready.dequeue() {
            Some((next, _)) => {
                self.dispatch(next)?;
                if prev == Some(next) {
                    Ok(Dispatch::Continue(next))
                } else {
                    Ok(Dispatch::Switch { prev, next })
                }
            }
            None => {
                self.current = None;
                Ok(Dispatch::Idle { prev })
            }
        }
    }

    /// Timer interrupt bookkeeping
    ///
    /// Charges the tick to the running process, wakes expired sleepers, ages
    /// waiting ready processes and periodically runs the reap pass. Returns
    /// true when the running process should be preempted.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        let now = self.ticks;

        match self.current.and_then(|pid| self.table.get_mut(pid)) {
            Some(pcb) if pcb.state == ProcessState::Running => {
                pcb.cpu_time += 1;
                pcb.window_cpu += 1;
                pcb.slice_left = pcb.slice_left.saturating_sub(1);
            }
            _ => self.stats.idle_ticks += 1,
        }

        let window = self.config.cpu_window;
        if now % window == 0 {
            for pcb in self.table.iter_mut() {
                pcb.cpu_percent = (pcb.window_cpu * 100 / window).min(100) as u8;
                pcb.window_cpu = 0;
            }
        }

        let sleepers = self.table.pids_where(|pcb| {
            pcb.state == ProcessState::Sleeping && pcb.wake_tick.is_some_and(|t| t <= now)
        });
        for pid in sleepers {
            if self.make_ready(pid, false).is_ok() {
                log::trace!(target: "ke::sched", "pid {} woke at tick {}", pid, now);
            }
        }

        self.age_ready();

        if now % self.config.reap_interval == 0 {
            self.reap_zombies();
        }

        match self.current.and_then(|pid| self.table.get(pid)) {
            Some(pcb) if pcb.state == ProcessState::Running => {
                pcb.slice_left == 0
                    || self.ready.highest_class().is_some_and(|class| class < pcb.priority)
            }
            _ => false,
        }
    }

    /// Promote ready processes that have waited past the aging threshold
    fn age_ready(&mut self) {
        let threshold = self.config.aging_threshold;
        if threshold == 0 {
            return;
        }
        let now = self.ticks;

        for class in 1..self.ready.levels() as u8 {
            let table = &self.table;
            let aged = self.ready.take_matching(class, |pid| {
                table
                    .get(pid)
                    .is_some_and(|pcb| now.saturating_sub(pcb.ready_since) >= threshold)
            });
            for pid in aged {
                if let Some(pcb) = self.table.get_mut(pid) {
                    pcb.queue_class = class - 1;
                    pcb.ready_since = now;
                }
                self.ready.enqueue(pid, class - 1);
            }
        }
    }

    // ------------------------------------------------------------------
    // Reaping
    // ------------------------------------------------------------------

    /// Free every `Zombie` slot; returns how many were freed
    ///
    /// The PCB whose stack the CPU is still on is left for a later pass.
    pub fn reap_zombies(&mut self) -> usize {
        let on_cpu = self.on_cpu;
        let zombies = self
            .table
            .pids_where(|pcb| pcb.state == ProcessState::Zombie && Some(pcb.pid) != on_cpu);

        let mut freed = 0;
        for pid in zombies {
            match self.release(pid) {
                Ok(()) => freed += 1,
                Err(e) => log::error!(target: "ps", "reap of pid {} failed: {}", pid, e),
            }
        }
        freed
    }

    /// Free a zombie's slot and return its resources
    fn release(&mut self, pid: Pid) -> KResult<()> {
        let pcb = self.table.free(pid)?;

        if let Some(stack) = pcb.stack {
            self.memory.release(stack);
        }
        self.drop_space_ref(pcb.address_space);

        // Children outlive their parent; forget the link so a reused pid
        // is never mistaken for it.
        for child in self.table.iter_mut().filter(|c| c.parent == Some(pid)) {
            child.parent = None;
        }

        self.stats.reaped += 1;
        log::debug!(
            target: "ps",
            "reaped pid {} '{}' (exit {:?})",
            pid,
            pcb.name,
            pcb.exit_code
        );
        Ok(())
    }

    pub(super) fn add_space_ref(&mut self, space: AddressSpaceId) {
        *self.space_refs.entry(space).or_insert(0) += 1;
    }

    fn drop_space_ref(&mut self, space: AddressSpaceId) {
        let Some(refs) = self.space_refs.get_mut(&space) else {
            log::error!(target: "ps", "BUG: {} released with no references", space);
            return;
        };
        *refs -= 1;
        if *refs == 0 {
            self.space_refs.remove(&space);
            if space != AddressSpaceId::KERNEL {
                self.memory.destroy_address_space(space);
                log::debug!(target: "ps", "{} torn down", space);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manager, spawn_normal};

    #[test]
    fn test_kernel_process_is_running() {
        let pm = manager();
        assert_eq!(pm.current(), Some(KERNEL_PID));
        let kernel = pm.table().get(KERNEL_PID).unwrap();
        assert_eq!(kernel.state, ProcessState::Running);
        assert_eq!(kernel.privilege, Privilege::Supervisor);
    }

    #[test]
    fn test_equal_priority_dispatch_is_fifo() {
        let mut pm = manager();
        let pids: alloc::vec::Vec<Pid> = (0..4)
            .map(|i| spawn_normal(&mut pm, &alloc::format!("p{}", i)))
            .collect();

        // Kernel gets out of the way; it re-queues behind the spawned ones.
        let mut order = alloc::vec::Vec::new();
        for _ in 0..4 {
            match pm.reschedule(SchedulerEvent::VoluntaryYield).unwrap() {
                Dispatch::Switch { next, .. } => order.push(next),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(order, pids);
    }

    #[test]
    fn test_timer_tick_keeps_slice_then_preempts() {
        let mut pm = ProcessManager::new(
            Config::new().with_time_slice(2),
            alloc::boxed::Box::new(crate::testing::FakeMemory::new()),
        )
        .unwrap();
        let other = spawn_normal(&mut pm, "other");

        assert!(!pm.tick());
        assert_eq!(
            pm.reschedule(SchedulerEvent::TimerTick).unwrap(),
            Dispatch::Continue(KERNEL_PID)
        );
        assert!(pm.tick());
        assert_eq!(
            pm.reschedule(SchedulerEvent::TimerTick).unwrap(),
            Dispatch::Switch { prev: Some(KERNEL_PID), next: other }
        );
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Ready);
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().cpu_time, 2);
        assert_eq!(pm.stats().preemptions, 1);
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut pm = manager();
        let kernel = pm.table.get_mut(KERNEL_PID).unwrap();
        transition(KERNEL_PID, &mut kernel.state, ProcessState::Sleeping).unwrap();
        kernel.wake_tick = Some(2);

        assert_eq!(
            pm.reschedule(SchedulerEvent::BlockingCall).unwrap(),
            Dispatch::Idle { prev: Some(KERNEL_PID) }
        );
        assert_eq!(pm.current(), None);

        pm.tick();
        assert_eq!(pm.ready_count(), 0);
        pm.tick();
        assert_eq!(pm.ready_count(), 1);
        // Woken on the same stack it idled on: no switch needed
        assert_eq!(
            pm.reschedule(SchedulerEvent::BlockingCall).unwrap(),
            Dispatch::Continue(KERNEL_PID)
        );
        assert_eq!(pm.stats().idle_ticks, 2);
    }

    #[test]
    fn test_fresh_mark_taken_once() {
        let mut pm = manager();
        let pid = spawn_normal(&mut pm, "new");
        assert!(!pm.take_fresh(KERNEL_PID));
        assert!(pm.take_fresh(pid));
        assert!(!pm.take_fresh(pid));
    }

    #[test]
    fn test_blocking_call_while_running_is_bug() {
        let mut pm = manager();
        assert_eq!(
            pm.reschedule(SchedulerEvent::BlockingCall),
            Err(KernelError::Bug)
        );
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_aging_promotes_starved_process() {
        let mut pm = ProcessManager::new(
            Config::new().with_aging_threshold(3).with_time_slice(100),
            alloc::boxed::Box::new(crate::testing::FakeMemory::new()),
        )
        .unwrap();
        let pid = spawn_normal(&mut pm, "starved");
        let base = pm.table().get(pid).unwrap().priority;

        for _ in 0..3 {
            pm.tick();
        }
        let pcb = pm.table().get(pid).unwrap();
        assert_eq!(pcb.queue_class, base - 1);
        assert_eq!(pm.ready.class_len(base - 1), 1);

        // The promoted process now outranks the running kernel process
        assert!(pm.tick());
    }

    #[test]
    fn test_cpu_percent_window() {
        let mut pm = ProcessManager::new(
            Config::new().with_cpu_window(10).with_time_slice(1000),
            alloc::boxed::Box::new(crate::testing::FakeMemory::new()),
        )
        .unwrap();
        for _ in 0..10 {
            pm.tick();
        }
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().cpu_percent, 100);
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().cpu_time, 10);
    }
}
