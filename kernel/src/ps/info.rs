//! Process queries and attribute changes

use alloc::vec::Vec;
use core::fmt;

use super::manager::ProcessManager;
use super::pcb::{Pcb, Pid, Privilege, ProcessType};
use crate::config::constants::PROCESS_NAME_LENGTH;
use crate::error::{KResult, KernelError};
use crate::ke::ProcessState;

/// `parent` value of a process without one
pub const NO_PARENT: u32 = u32::MAX;

/// `exit_code` value of a process that has not finished
pub const NO_EXIT_CODE: i32 = i32::MIN;

/// Snapshot of a PCB, laid out for copying to user memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: u32,
    pub uid: u32,
    pub descendant_threads: u32,
    pub cpu_time: u64,
    pub exit_code: i32,
    pub process_type: u8,
    pub state: u8,
    pub priority: u8,
    pub privilege: u8,
    pub cpu_percent: u8,
    pub _reserved: [u8; 7],
    pub name: [u8; PROCESS_NAME_LENGTH],
}

impl ProcessInfo {
    pub fn from_pcb(pcb: &Pcb) -> Self {
        Self {
            pid: pcb.pid,
            parent: pcb.parent.unwrap_or(NO_PARENT),
            uid: pcb.uid,
            descendant_threads: pcb.descendant_threads,
            cpu_time: pcb.cpu_time,
            exit_code: pcb.exit_code.unwrap_or(NO_EXIT_CODE),
            process_type: pcb.process_type as u8,
            state: pcb.state as u8,
            priority: pcb.priority,
            privilege: pcb.privilege as u8,
            cpu_percent: pcb.cpu_percent,
            _reserved: [0; 7],
            name: *pcb.name.raw(),
        }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    pub fn state(&self) -> Option<ProcessState> {
        ProcessState::from_raw(self.state)
    }
}

impl fmt::Display for ProcessInfo {
    /// One line of a process listing:
    /// `PID PPID STATE  PRI CPU% TYPE   NAME`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state().map(|s| s.label()).unwrap_or("?     ");
        let kind = match ProcessType::from_raw(self.process_type as usize) {
            Some(ProcessType::Thread) => "thread",
            _ => "proc  ",
        };
        if self.parent == NO_PARENT {
            write!(f, "{:>4}    - ", self.pid)?;
        } else {
            write!(f, "{:>4} {:>4} ", self.pid, self.parent)?;
        }
        write!(
            f,
            "{} {:>3} {:>3}% {} {}",
            state,
            self.priority,
            self.cpu_percent,
            kind,
            self.name()
        )
    }
}

impl ProcessManager {
    pub fn process_info(&self, pid: Pid) -> KResult<ProcessInfo> {
        self.table.lookup(pid).map(ProcessInfo::from_pcb)
    }

    /// Snapshot of every live PCB in pid order
    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.table.iter().map(ProcessInfo::from_pcb).collect()
    }

    pub fn process_state(&self, pid: Pid) -> KResult<ProcessState> {
        self.table.lookup(pid).map(|pcb| pcb.state)
    }

    pub fn parent_of(&self, pid: Pid) -> KResult<Option<Pid>> {
        self.table.lookup(pid).map(|pcb| pcb.parent)
    }

    pub fn get_privilege(&self, pid: Pid) -> KResult<Privilege> {
        self.table.lookup(pid).map(|pcb| pcb.privilege)
    }

    /// Only supervisor callers change privilege
    pub fn set_privilege(&mut self, caller: Pid, target: Pid, privilege: Privilege) -> KResult<()> {
        if self.table.lookup(caller)?.privilege != Privilege::Supervisor {
            return Err(KernelError::Permission);
        }
        let pcb = self.table.lookup_mut(target)?;
        if pcb.state.is_dead() {
            return Err(KernelError::NoSuchProcess);
        }
        log::info!(
            target: "ps",
            "pid {} privilege {:?} -> {:?} (by {})",
            target,
            pcb.privilege,
            privilege,
            caller
        );
        pcb.privilege = privilege;
        Ok(())
    }

    pub fn get_priority(&self, pid: Pid) -> KResult<u8> {
        self.table.lookup(pid).map(|pcb| pcb.priority)
    }

    /// Change the base priority class of `target`
    ///
    /// A user caller may only lower urgency (raise the class number). A
    /// queued process moves to its new class at the tail.
    pub fn set_priority(&mut self, caller: Pid, target: Pid, priority: u8) -> KResult<()> {
        if priority as usize >= self.config.priority_levels {
            return Err(KernelError::InvalidArgument);
        }
        let caller_privilege = self.table.lookup(caller)?.privilege;
        let now = self.ticks;
        let pcb = self.table.lookup_mut(target)?;
        if pcb.state.is_dead() {
            return Err(KernelError::NoSuchProcess);
        }
        if pcb.privilege.exceeds(caller_privilege)
            || (caller_privilege == Privilege::User && priority < pcb.priority)
        {
            return Err(KernelError::Permission);
        }

        let old_class = pcb.queue_class;
        pcb.priority = priority;
        if matches!(pcb.state, ProcessState::Ready | ProcessState::IoReady) {
            pcb.queue_class = priority;
            pcb.ready_since = now;
            if self.ready.remove(target, old_class) {
                self.ready.enqueue(target, priority);
            }
        } else {
            pcb.queue_class = priority;
        }
        log::debug!(target: "ps", "pid {} priority -> {}", target, priority);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ps::pcb::KERNEL_PID;
    use crate::ps::SpawnRequest;
    use crate::testing::{manager, program, spawn_normal};

    #[test]
    fn test_info_snapshot() {
        let mut pm = manager();
        let pid = spawn_normal(&mut pm, "shell");
        let info = pm.process_info(pid).unwrap();
        assert_eq!(info.pid, pid);
        assert_eq!(info.parent, KERNEL_PID);
        assert_eq!(info.name(), "shell");
        assert_eq!(info.state(), Some(ProcessState::Ready));
        assert_eq!(info.exit_code, NO_EXIT_CODE);

        let kernel = pm.process_info(KERNEL_PID).unwrap();
        assert_eq!(kernel.parent, NO_PARENT);
        assert_eq!(pm.list_processes().len(), 2);
    }

    #[test]
    fn test_info_display() {
        let pm = manager();
        let line = alloc::format!("{}", pm.process_info(KERNEL_PID).unwrap());
        assert!(line.contains("Run"));
        assert!(line.ends_with("kernel"));
    }

    #[test]
    fn test_set_privilege_requires_supervisor() {
        let mut pm = manager();
        let user = pm
            .spawn(KERNEL_PID, SpawnRequest::process(program(), "user").privilege(Privilege::User))
            .unwrap();
        assert_eq!(
            pm.set_privilege(user, user, Privilege::Supervisor),
            Err(KernelError::Permission)
        );
        pm.set_privilege(KERNEL_PID, user, Privilege::Supervisor).unwrap();
        assert_eq!(pm.get_privilege(user), Ok(Privilege::Supervisor));
    }

    #[test]
    fn test_set_priority_requeues() {
        let mut pm = manager();
        let pid = spawn_normal(&mut pm, "p");
        pm.set_priority(KERNEL_PID, pid, 1).unwrap();
        assert_eq!(pm.get_priority(pid), Ok(1));
        assert_eq!(pm.ready.class_len(1), 1);
        assert_eq!(pm.ready.class_len(pm.config.default_priority), 0);

        assert_eq!(pm.set_priority(KERNEL_PID, pid, 99), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_user_cannot_raise_priority() {
        let mut pm = manager();
        let user = pm
            .spawn(KERNEL_PID, SpawnRequest::process(program(), "user").privilege(Privilege::User))
            .unwrap();
        assert_eq!(pm.set_priority(user, user, 0), Err(KernelError::Permission));
        pm.set_priority(user, user, 5).unwrap();
    }
}
