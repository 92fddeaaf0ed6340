//! Descriptor Table
//!
//! Fixed-capacity arena of PCBs indexed by pid. The table exclusively owns
//! PCB storage; every other component holds pids.
//!
//! # Allocation
//! - Slot 0 is reserved for the kernel process
//! - A rotating hint hands out the next free slot after the last one
//!   allocated, so a freed pid is not reissued until the hint wraps around
//! - A freed slot remembers the exit code of its last occupant, which keeps
//!   repeated joins of a reaped pid answering with the same code

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::pcb::{Pcb, Pid, KERNEL_PID};
use crate::error::{KResult, KernelError};

enum Slot {
    Free { last_exit: Option<i32> },
    Occupied(Box<Pcb>),
}

/// Process descriptor table
pub struct ProcessTable {
    slots: Box<[Slot]>,
    /// Next pid to try
    next_pid: usize,
    live: usize,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Free { last_exit: None });
        Self {
            slots: slots.into_boxed_slice(),
            next_pid: 1,
            live: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live == self.slots.len()
    }

    /// Pid the next [`ProcessTable::install`] would use, if any slot is free
    pub fn next_free_pid(&self) -> Option<Pid> {
        let capacity = self.slots.len();
        // Search from hint to end, then from 1 to hint
        (self.next_pid..capacity)
            .chain(1..self.next_pid.min(capacity))
            .find(|&i| matches!(self.slots[i], Slot::Free { .. }))
            .map(|i| i as Pid)
    }

    /// Link a fully built PCB into the slot named by `pcb.pid`
    pub fn install(&mut self, pcb: Pcb) -> KResult<Pid> {
        let pid = pcb.pid;
        let index = pid as usize;
        match self.slots.get(index) {
            Some(Slot::Free { .. }) => {}
            Some(Slot::Occupied(_)) => {
                log::error!(target: "ps::table", "BUG: pid {} installed twice", pid);
                return Err(KernelError::Bug);
            }
            None => return Err(KernelError::InvalidArgument),
        }
        self.slots[index] = Slot::Occupied(Box::new(pcb));
        self.live += 1;
        if pid != KERNEL_PID {
            self.next_pid = if index + 1 >= self.slots.len() { 1 } else { index + 1 };
        }
        Ok(pid)
    }

    /// Release a slot, returning its PCB
    ///
    /// Freeing a slot that is already free is a kernel bug.
    pub fn free(&mut self, pid: Pid) -> KResult<Box<Pcb>> {
        let Some(slot) = self.slots.get_mut(pid as usize) else {
            return Err(KernelError::NoSuchProcess);
        };
        let last_exit = match slot {
            Slot::Occupied(pcb) => pcb.exit_code,
            Slot::Free { .. } => {
                log::error!(target: "ps::table", "BUG: pid {} freed twice", pid);
                return Err(KernelError::Bug);
            }
        };
        match core::mem::replace(slot, Slot::Free { last_exit }) {
            Slot::Occupied(pcb) => {
                self.live -= 1;
                Ok(pcb)
            }
            Slot::Free { .. } => Err(KernelError::Bug),
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        match self.slots.get(pid as usize)? {
            Slot::Occupied(pcb) => Some(pcb),
            Slot::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        match self.slots.get_mut(pid as usize)? {
            Slot::Occupied(pcb) => Some(pcb),
            Slot::Free { .. } => None,
        }
    }

    /// Look up a live PCB or fail with `NoSuchProcess`
    pub fn lookup(&self, pid: Pid) -> KResult<&Pcb> {
        self.get(pid).ok_or(KernelError::NoSuchProcess)
    }

    pub fn lookup_mut(&mut self, pid: Pid) -> KResult<&mut Pcb> {
        self.get_mut(pid).ok_or(KernelError::NoSuchProcess)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    /// Exit code left behind by the last PCB reaped from this slot
    pub fn last_exit(&self, pid: Pid) -> Option<i32> {
        match self.slots.get(pid as usize)? {
            Slot::Free { last_exit } => *last_exit,
            Slot::Occupied(_) => None,
        }
    }

    /// Live PCBs in pid order
    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(pcb) => Some(&**pcb),
            Slot::Free { .. } => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied(pcb) => Some(&mut **pcb),
            Slot::Free { .. } => None,
        })
    }

    /// Pids of live PCBs matching `pred`
    pub fn pids_where<F>(&self, mut pred: F) -> Vec<Pid>
    where
        F: FnMut(&Pcb) -> bool,
    {
        self.iter().filter(|pcb| pred(pcb)).map(|pcb| pcb.pid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blank_pcb;

    fn fill(table: &mut ProcessTable) -> Pid {
        let pid = table.next_free_pid().unwrap();
        table.install(blank_pcb(pid)).unwrap()
    }

    #[test]
    fn test_allocation_starts_after_kernel_slot() {
        let mut table = ProcessTable::new(8);
        assert_eq!(fill(&mut table), 1);
        assert_eq!(fill(&mut table), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_freed_pid_not_reused_until_wrap() {
        let mut table = ProcessTable::new(4);
        assert_eq!(fill(&mut table), 1);
        assert_eq!(fill(&mut table), 2);
        table.free(1).unwrap();
        // Hint continues past 2 before wrapping back to 1
        assert_eq!(fill(&mut table), 3);
        assert_eq!(fill(&mut table), 1);
        assert_eq!(table.next_free_pid(), None);
    }

    #[test]
    fn test_double_free_is_bug() {
        let mut table = ProcessTable::new(4);
        let pid = fill(&mut table);
        assert!(table.free(pid).is_ok());
        assert_eq!(table.free(pid).err(), Some(KernelError::Bug));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_install_twice_is_bug() {
        let mut table = ProcessTable::new(4);
        let pid = fill(&mut table);
        assert_eq!(table.install(blank_pcb(pid)), Err(KernelError::Bug));
    }

    #[test]
    fn test_last_exit_survives_free() {
        let mut table = ProcessTable::new(4);
        let pid = fill(&mut table);
        table.get_mut(pid).unwrap().exit_code = Some(42);
        table.free(pid).unwrap();
        assert_eq!(table.last_exit(pid), Some(42));
        assert!(table.get(pid).is_none());
        assert_eq!(table.lookup(pid).err(), Some(KernelError::NoSuchProcess));
    }

    #[test]
    fn test_kernel_slot_install_keeps_hint() {
        let mut table = ProcessTable::new(4);
        table.install(blank_pcb(KERNEL_PID)).unwrap();
        assert_eq!(table.next_free_pid(), Some(1));
    }
}
