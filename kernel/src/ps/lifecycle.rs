//! Process lifecycle
//!
//! Blocking, termination and the operations that move a PCB between the
//! runnable and blocked states.
//!
//! ```text
//!                 spawn
//!                   │
//!   Stopped ◄───────┼──────► Ready/IoReady ◄──── wake / resume / io
//!      ▲            dispatch │   ▲                     │
//!      │                     ▼   │ yield / preempt     │
//!      └──── stop ────── Running ─────────────► Waiting / Sleeping
//!                            │
//!                  exit/kill ▼
//!                        Finished ── joined / detached / orphaned ──► Zombie ── reap ──► (free)
//! ```
//!
//! None of these switch stacks. An operation that takes the caller out of
//! `Running` leaves it to the caller to reschedule with
//! `SchedulerEvent::BlockingCall`.

use super::manager::ProcessManager;
use super::pcb::{Pid, ProcessFlags, ProcessType, WaitReason, EXIT_CODE_KILLED, KERNEL_PID};
use crate::error::{KResult, KernelError};
use crate::ke::{transition, ProcessState};

/// Outcome of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Target already finished with this exit code
    Complete(i32),
    /// Caller is now `Waiting`; the code arrives when it is woken
    Blocked,
}

impl ProcessManager {
    /// Block `caller` until `target` finishes
    pub fn block(&mut self, caller: Pid, target: Pid) -> KResult<JoinStatus> {
        if caller == target {
            log::warn!(target: "ps::lifecycle", "pid {} tried to join itself", caller);
            return Err(KernelError::Deadlock);
        }

        let Some(pcb) = self.table.get(target) else {
            // Already reaped: answer with the code it left behind
            return self
                .table
                .last_exit(target)
                .map(JoinStatus::Complete)
                .ok_or(KernelError::NoSuchProcess);
        };
        let (state, exit_code) = (pcb.state, pcb.exit_code);

        match state {
            ProcessState::Finished => {
                let code = exit_code.ok_or(KernelError::Bug)?;
                self.zombify(target)?;
                return Ok(JoinStatus::Complete(code));
            }
            ProcessState::Zombie => {
                return exit_code.map(JoinStatus::Complete).ok_or(KernelError::Bug);
            }
            _ => {}
        }

        // Walk the target's own join chain; reaching the caller closes a cycle.
        let mut cursor = target;
        for _ in 0..self.table.capacity() {
            match self.table.get(cursor).and_then(|p| match p.state {
                ProcessState::Waiting => p.wait,
                _ => None,
            }) {
                Some(WaitReason::Join(next)) if next == caller => {
                    log::warn!(
                        target: "ps::lifecycle",
                        "join {} -> {} would deadlock",
                        caller,
                        target
                    );
                    return Err(KernelError::Deadlock);
                }
                Some(WaitReason::Join(next)) => cursor = next,
                _ => break,
            }
        }

        let pcb = self.table.lookup_mut(caller)?;
        transition(caller, &mut pcb.state, ProcessState::Waiting)?;
        pcb.wait = Some(WaitReason::Join(target));
        pcb.wait_result = None;
        if self.current == Some(caller) {
            self.current = None;
        }
        log::debug!(target: "ps::lifecycle", "pid {} waiting on {}", caller, target);
        Ok(JoinStatus::Blocked)
    }

    /// Exit code delivered to a woken joiner
    pub fn take_wait_result(&mut self, pid: Pid) -> KResult<i32> {
        self.table
            .lookup_mut(pid)?
            .wait_result
            .take()
            .ok_or(KernelError::Bug)
    }

    /// Running `caller` terminates itself
    pub fn exit(&mut self, caller: Pid, code: i32) -> KResult<()> {
        let state = self.table.lookup(caller)?.state;
        if state != ProcessState::Running {
            log::error!(
                target: "ps::lifecycle",
                "BUG: pid {} exiting from state {}",
                caller,
                state
            );
            return Err(KernelError::Bug);
        }
        log::info!(target: "ps::lifecycle", "pid {} exited with {}", caller, code);
        self.finish(caller, code, false)
    }

    /// Terminate `target` on behalf of `caller`
    ///
    /// Without `force`, a process blocked in a join is left alone.
    pub fn kill(&mut self, caller: Pid, target: Pid, force: bool) -> KResult<()> {
        let caller_privilege = self.table.lookup(caller)?.privilege;
        let pcb = self.table.lookup(target)?;

        if pcb.state.is_dead() {
            return Err(KernelError::Already);
        }
        if target == KERNEL_PID {
            log::warn!(target: "ps::lifecycle", "pid {} tried to kill the kernel process", caller);
            return Err(KernelError::Permission);
        }
        if pcb.privilege.exceeds(caller_privilege) {
            return Err(KernelError::Permission);
        }
        if !force && pcb.state == ProcessState::Waiting {
            return Err(KernelError::Permission);
        }

        log::info!(
            target: "ps::lifecycle",
            "pid {} killed by {}{}",
            target,
            caller,
            if force { " (forced)" } else { "" }
        );
        self.finish(target, EXIT_CODE_KILLED, true)
    }

    /// Move `pid` to `Finished` and settle everything that depended on it
    fn finish(&mut self, pid: Pid, code: i32, killed: bool) -> KResult<()> {
        let (was_queued, class) = {
            let pcb = self.table.lookup_mut(pid)?;
            let from = pcb.state;
            transition(pid, &mut pcb.state, ProcessState::Finished)?;
            pcb.exit_code = Some(code);
            pcb.wait = None;
            pcb.wake_tick = None;
            pcb.wait_result = None;
            if killed {
                pcb.flags.insert(ProcessFlags::KILLED);
            }
            (
                matches!(from, ProcessState::Ready | ProcessState::IoReady),
                pcb.queue_class,
            )
        };
        if was_queued {
            self.ready.remove(pid, class);
        }
        if self.current == Some(pid) {
            self.current = None;
        }

        let joiners = self.table.pids_where(|p| p.is_waiting_on(pid));
        for &joiner in &joiners {
            if let Some(pcb) = self.table.get_mut(joiner) {
                pcb.wait_result = Some(code);
            }
            self.make_ready(joiner, false)?;
        }

        // Its finished children lose the only process expected to join them
        let orphans = self
            .table
            .pids_where(|p| p.parent == Some(pid) && p.state == ProcessState::Finished);
        for orphan in orphans {
            self.zombify(orphan)?;
        }

        let pcb = self.table.lookup(pid)?;
        let detached = pcb.flags.contains(ProcessFlags::DETACHED);
        let parent_alive = pcb
            .parent
            .and_then(|parent| self.table.get(parent))
            .is_some_and(|parent| !parent.state.is_dead());

        if !joiners.is_empty() || detached || !parent_alive {
            self.zombify(pid)?;
        }
        Ok(())
    }

    /// `Finished` to `Zombie`, settling the parent's thread count
    pub(super) fn zombify(&mut self, pid: Pid) -> KResult<()> {
        let pcb = self.table.lookup_mut(pid)?;
        transition(pid, &mut pcb.state, ProcessState::Zombie)?;
        let (process_type, parent) = (pcb.process_type, pcb.parent);

        if process_type == ProcessType::Thread {
            if let Some(parent) = parent.and_then(|p| self.table.get_mut(p)) {
                if parent.descendant_threads == 0 {
                    log::error!(
                        target: "ps::lifecycle",
                        "BUG: thread count of pid {} underflows",
                        parent.pid
                    );
                    return Err(KernelError::Bug);
                }
                parent.descendant_threads -= 1;
            }
        }
        log::debug!(target: "ps::lifecycle", "pid {} is a zombie", pid);
        Ok(())
    }

    /// Give up the CPU; the caller reschedules with `VoluntaryYield`
    pub fn yield_now(&mut self, caller: Pid) -> KResult<()> {
        let state = self.table.lookup(caller)?.state;
        if state != ProcessState::Running {
            return Err(KernelError::Bug);
        }
        self.make_ready(caller, false)
    }

    /// Running `caller` sleeps for `ticks` timer ticks
    pub fn sleep(&mut self, caller: Pid, ticks: u64) -> KResult<()> {
        if ticks == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let wake = self.ticks + ticks;
        let pcb = self.table.lookup_mut(caller)?;
        transition(caller, &mut pcb.state, ProcessState::Sleeping)?;
        pcb.wake_tick = Some(wake);
        if self.current == Some(caller) {
            self.current = None;
        }
        log::trace!(target: "ps::lifecycle", "pid {} sleeps until tick {}", caller, wake);
        Ok(())
    }

    /// Suspend `target` until resumed; only a running process can stop
    pub fn stop(&mut self, caller: Pid, target: Pid) -> KResult<()> {
        self.check_control(caller, target)?;
        let pcb = self.table.lookup_mut(target)?;
        match pcb.state {
            ProcessState::Stopped => Err(KernelError::Already),
            ProcessState::Running => {
                transition(target, &mut pcb.state, ProcessState::Stopped)?;
                if self.current == Some(target) {
                    self.current = None;
                }
                log::debug!(target: "ps::lifecycle", "pid {} stopped by {}", target, caller);
                Ok(())
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Make a `Stopped` process ready again
    pub fn resume(&mut self, caller: Pid, target: Pid) -> KResult<()> {
        self.check_control(caller, target)?;
        match self.table.lookup(target)?.state {
            ProcessState::Stopped => {
                log::debug!(target: "ps::lifecycle", "pid {} resumed by {}", target, caller);
                self.make_ready(target, false)
            }
            state if state.is_runnable() => Err(KernelError::Already),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Nobody will join `target`; it is reaped as soon as it finishes
    pub fn detach(&mut self, caller: Pid, target: Pid) -> KResult<()> {
        self.check_control(caller, target)?;
        let pcb = self.table.lookup_mut(target)?;
        if pcb.flags.contains(ProcessFlags::DETACHED) {
            return Err(KernelError::Already);
        }
        pcb.flags.insert(ProcessFlags::DETACHED);
        match pcb.state {
            ProcessState::Finished => self.zombify(target),
            ProcessState::Zombie => Err(KernelError::Already),
            _ => Ok(()),
        }
    }

    /// Running `caller` waits for a device completion
    pub fn wait_for_io(&mut self, caller: Pid) -> KResult<()> {
        let pcb = self.table.lookup_mut(caller)?;
        transition(caller, &mut pcb.state, ProcessState::Waiting)?;
        pcb.wait = Some(WaitReason::Io);
        if self.current == Some(caller) {
            self.current = None;
        }
        Ok(())
    }

    /// Device completion for `pid`: it becomes `IoReady` with a one-shot boost
    pub fn complete_io(&mut self, pid: Pid) -> KResult<()> {
        let pcb = self.table.lookup(pid)?;
        match (pcb.state, pcb.wait) {
            (ProcessState::Waiting, Some(WaitReason::Io)) => self.make_ready(pid, true),
            (state, _) if state.is_runnable() => Err(KernelError::Already),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `caller` may stop, resume or detach `target`
    ///
    /// Allowed on itself, on its children, or with at least the target's
    /// privilege.
    fn check_control(&self, caller: Pid, target: Pid) -> KResult<()> {
        let caller_privilege = self.table.lookup(caller)?.privilege;
        let pcb = self.table.lookup(target)?;
        if caller == target || pcb.parent == Some(caller) || !pcb.privilege.exceeds(caller_privilege)
        {
            Ok(())
        } else {
            Err(KernelError::Permission)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::{Dispatch, SchedulerEvent};
    use crate::ps::pcb::{Privilege, ThreadStart};
    use crate::ps::SpawnRequest;
    use crate::testing::{manager, program, run, spawn_normal};

    #[test]
    fn test_join_after_exit_returns_code_and_zombifies() {
        let mut pm = manager();
        let child = spawn_normal(&mut pm, "child");
        run(&mut pm, child);
        pm.exit(child, 42).unwrap();
        assert_eq!(pm.table().get(child).unwrap().state, ProcessState::Finished);

        run(&mut pm, KERNEL_PID);
        assert_eq!(pm.block(KERNEL_PID, child), Ok(JoinStatus::Complete(42)));
        assert_eq!(pm.table().get(child).unwrap().state, ProcessState::Zombie);

        // Joining again, before and after the reap, gives the same code
        assert_eq!(pm.block(KERNEL_PID, child), Ok(JoinStatus::Complete(42)));
        assert_eq!(pm.reap_zombies(), 1);
        assert_eq!(pm.reap_zombies(), 0);
        assert!(pm.table().get(child).is_none());
        assert_eq!(pm.block(KERNEL_PID, child), Ok(JoinStatus::Complete(42)));
    }

    #[test]
    fn test_blocked_joiner_is_woken_with_code() {
        let mut pm = manager();
        let child = spawn_normal(&mut pm, "child");

        assert_eq!(pm.block(KERNEL_PID, child), Ok(JoinStatus::Blocked));
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Waiting);
        assert_eq!(
            pm.reschedule(SchedulerEvent::BlockingCall).unwrap(),
            Dispatch::Switch { prev: Some(KERNEL_PID), next: child }
        );

        pm.exit(child, 5).unwrap();
        assert_eq!(pm.table().get(child).unwrap().state, ProcessState::Zombie);
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Ready);
        assert_eq!(
            pm.reschedule(SchedulerEvent::BlockingCall).unwrap(),
            Dispatch::Switch { prev: Some(child), next: KERNEL_PID }
        );
        assert_eq!(pm.take_wait_result(KERNEL_PID), Ok(5));
    }

    #[test]
    fn test_self_join_is_deadlock() {
        let mut pm = manager();
        assert_eq!(pm.block(KERNEL_PID, KERNEL_PID), Err(KernelError::Deadlock));
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_join_cycle_is_deadlock() {
        let mut pm = manager();
        let a = spawn_normal(&mut pm, "a");
        let b = spawn_normal(&mut pm, "b");

        run(&mut pm, a);
        assert_eq!(pm.block(a, b), Ok(JoinStatus::Blocked));
        run(&mut pm, b);
        assert_eq!(pm.block(b, a), Err(KernelError::Deadlock));
        assert_eq!(pm.table().get(b).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_join_unknown_pid() {
        let mut pm = manager();
        assert_eq!(pm.block(KERNEL_PID, 77), Err(KernelError::NoSuchProcess));
    }

    #[test]
    fn test_kill_rules() {
        let mut pm = manager();
        let user = pm
            .spawn(KERNEL_PID, SpawnRequest::process(program(), "user").privilege(Privilege::User))
            .unwrap();
        let victim = spawn_normal(&mut pm, "victim");

        assert_eq!(pm.kill(user, KERNEL_PID, true), Err(KernelError::Permission));
        assert_eq!(pm.kill(user, victim, true), Err(KernelError::Permission));
        assert_eq!(pm.kill(KERNEL_PID, 200, true), Err(KernelError::NoSuchProcess));

        pm.kill(KERNEL_PID, victim, false).unwrap();
        let pcb = pm.table().get(victim).unwrap();
        assert_eq!(pcb.state, ProcessState::Finished);
        assert_eq!(pcb.exit_code, Some(EXIT_CODE_KILLED));
        assert!(pcb.flags.contains(ProcessFlags::KILLED));
        assert_eq!(pm.ready_count(), 1);
        assert_eq!(pm.kill(KERNEL_PID, victim, false), Err(KernelError::Already));

        pm.detach(KERNEL_PID, victim).unwrap();
        assert_eq!(pm.table().get(victim).unwrap().state, ProcessState::Zombie);
        assert_eq!(pm.kill(KERNEL_PID, victim, false), Err(KernelError::Already));
        assert_eq!(pm.kill(KERNEL_PID, victim, true), Err(KernelError::Already));
    }

    #[test]
    fn test_unforced_kill_spares_joiner() {
        let mut pm = manager();
        let a = spawn_normal(&mut pm, "a");
        let b = spawn_normal(&mut pm, "b");
        run(&mut pm, a);
        pm.block(a, b).unwrap();

        assert_eq!(pm.kill(KERNEL_PID, a, false), Err(KernelError::Permission));
        pm.kill(KERNEL_PID, a, true).unwrap();
        assert_eq!(pm.table().get(a).unwrap().wait, None);
    }

    #[test]
    fn test_detached_thread_reaped_and_counted() {
        let mut pm = manager();
        let start = ThreadStart { routine: 0x4000, argument: 0 };
        let tid = pm.spawn_thread(KERNEL_PID, start, "worker").unwrap();
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().descendant_threads, 1);

        pm.detach(KERNEL_PID, tid).unwrap();
        run(&mut pm, tid);
        pm.exit(tid, 0).unwrap();
        assert_eq!(pm.table().get(tid).unwrap().state, ProcessState::Zombie);
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().descendant_threads, 0);

        // Still on its stack; reaped once something else runs
        assert_eq!(pm.reap_zombies(), 0);
        pm.reschedule(SchedulerEvent::BlockingCall).unwrap();
        assert_eq!(pm.reap_zombies(), 1);
    }

    #[test]
    fn test_orphans_become_zombies() {
        let mut pm = manager();
        let parent = spawn_normal(&mut pm, "parent");
        run(&mut pm, parent);
        let child = pm.spawn_process(parent, program(), "child").unwrap();
        run(&mut pm, child);
        pm.exit(child, 3).unwrap();
        assert_eq!(pm.table().get(child).unwrap().state, ProcessState::Finished);

        run(&mut pm, parent);
        pm.exit(parent, 0).unwrap();
        assert_eq!(pm.table().get(child).unwrap().state, ProcessState::Zombie);
        // Its own parent, the kernel process, is alive to join it
        assert_eq!(pm.table().get(parent).unwrap().state, ProcessState::Finished);
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut pm = manager();
        pm.sleep(KERNEL_PID, 3).unwrap();
        assert_eq!(pm.sleep(KERNEL_PID, 3), Err(KernelError::Bug));
        for _ in 0..2 {
            pm.tick();
        }
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Sleeping);
        pm.tick();
        assert_eq!(pm.table().get(KERNEL_PID).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn test_stop_and_resume() {
        let mut pm = manager();
        let pid = spawn_normal(&mut pm, "p");
        assert_eq!(pm.stop(KERNEL_PID, pid), Err(KernelError::InvalidArgument));
        assert_eq!(pm.resume(KERNEL_PID, pid), Err(KernelError::Already));

        run(&mut pm, pid);
        pm.stop(pid, pid).unwrap();
        assert_eq!(pm.stop(KERNEL_PID, pid), Err(KernelError::Already));
        pm.resume(KERNEL_PID, pid).unwrap();
        assert_eq!(pm.table().get(pid).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn test_io_completion_boosts_once() {
        let mut pm = manager();
        let pid = spawn_normal(&mut pm, "reader");
        run(&mut pm, pid);
        pm.wait_for_io(pid).unwrap();
        assert_eq!(pm.complete_io(KERNEL_PID), Err(KernelError::Already));

        pm.complete_io(pid).unwrap();
        let pcb = pm.table().get(pid).unwrap();
        assert_eq!(pcb.state, ProcessState::IoReady);
        assert!(pcb.flags.contains(ProcessFlags::IO_BOOST));
        assert_eq!(pcb.queue_class, pcb.priority - pm.config().io_boost);

        run(&mut pm, pid);
        let pcb = pm.table().get(pid).unwrap();
        assert!(!pcb.flags.contains(ProcessFlags::IO_BOOST));
        assert_eq!(pcb.queue_class, pcb.priority);
    }
}
