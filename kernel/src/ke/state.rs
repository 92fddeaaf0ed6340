//! Process state machine
//!
//! The single authority on which state changes a PCB may undergo. Every
//! component that moves a process between states goes through [`transition`];
//! nothing assigns `Pcb::state` directly.
//!
//! ```text
//!              dispatch                 block
//!   Ready ─────────────────► Running ─────────────► Waiting / Sleeping / Stopped
//!     ▲  ◄─────────────────    │                           │
//!     │     preempt / yield    │ exit                      │ unblock
//!     │                        ▼                           ▼
//!     │                    Finished ◄──── kill ────  (any but Zombie)
//!     │                        │
//!   IoReady ──► Running        ▼ reap
//!                            Zombie
//! ```

use core::fmt;

use crate::error::{KResult, KernelError};
use crate::ps::Pid;

/// Process states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessState {
    /// Occupying the CPU
    Running = 0,
    /// Runnable, waiting in a ready queue
    Ready = 1,
    /// Runnable, most recently unblocked by device completion
    IoReady = 2,
    /// Blocked on another process or a resource
    Waiting = 3,
    /// Blocked until a deadline
    Sleeping = 4,
    /// Suspended by explicit request
    Stopped = 5,
    /// Exit code recorded, resources still held
    Finished = 6,
    /// Exit code collected; slot awaits the reap pass
    Zombie = 7,
}

impl ProcessState {
    pub const ALL: [ProcessState; 8] = [
        ProcessState::Running,
        ProcessState::Ready,
        ProcessState::IoReady,
        ProcessState::Waiting,
        ProcessState::Sleeping,
        ProcessState::Stopped,
        ProcessState::Finished,
        ProcessState::Zombie,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Waiting in a ready queue
    #[inline]
    pub fn is_runnable(self) -> bool {
        matches!(self, ProcessState::Ready | ProcessState::IoReady)
    }

    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ProcessState::Waiting | ProcessState::Sleeping | ProcessState::Stopped
        )
    }

    /// Finished or Zombie
    #[inline]
    pub fn is_dead(self) -> bool {
        matches!(self, ProcessState::Finished | ProcessState::Zombie)
    }

    /// Short fixed-width label for process listings
    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Running => "Run   ",
            ProcessState::Ready => "Ready ",
            ProcessState::IoReady => "IoRdy ",
            ProcessState::Waiting => "Wait  ",
            ProcessState::Sleeping => "Sleep ",
            ProcessState::Stopped => "Stop  ",
            ProcessState::Finished => "Fini  ",
            ProcessState::Zombie => "Zombie",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().trim_end())
    }
}

/// Whether `from -> to` is in the legal transition set
pub const fn is_legal(from: ProcessState, to: ProcessState) -> bool {
    use ProcessState::*;

    matches!(
        (from, to),
        // dispatch
        (Ready, Running) | (IoReady, Running)
        // preemption / yield
        | (Running, Ready)
        // blocking calls
        | (Running, Waiting) | (Running, Sleeping) | (Running, Stopped)
        // unblock
        | (Waiting, Ready) | (Waiting, IoReady)
        | (Sleeping, Ready) | (Sleeping, IoReady)
        | (Stopped, Ready) | (Stopped, IoReady)
        // exit and kill
        | (Running, Finished) | (Ready, Finished) | (IoReady, Finished)
        | (Waiting, Finished) | (Sleeping, Finished) | (Stopped, Finished)
        // reap
        | (Finished, Zombie)
    )
}

/// Apply a state change, rejecting anything outside the legal set
///
/// An illegal request leaves `state` untouched, is logged at error level and
/// returns [`KernelError::Bug`]. The caller's operation fails; the kernel
/// carries on.
pub fn transition(pid: Pid, state: &mut ProcessState, to: ProcessState) -> KResult<()> {
    let from = *state;
    if !is_legal(from, to) {
        log::error!(
            target: "ke::state",
            "BUG: illegal transition {} -> {} for pid {}",
            from,
            to,
            pid
        );
        return Err(KernelError::Bug);
    }
    log::trace!(target: "ke::state", "pid {}: {} -> {}", pid, from, to);
    *state = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessState::*;

    #[test]
    fn test_dispatch_and_preempt() {
        let mut state = Ready;
        assert!(transition(1, &mut state, Running).is_ok());
        assert!(transition(1, &mut state, Ready).is_ok());
        assert_eq!(state, Ready);
    }

    #[test]
    fn test_illegal_transition_is_bug_and_unchanged() {
        let mut state = Ready;
        assert_eq!(transition(1, &mut state, Waiting), Err(KernelError::Bug));
        assert_eq!(state, Ready);

        let mut state = Zombie;
        assert_eq!(transition(1, &mut state, Finished), Err(KernelError::Bug));
        assert_eq!(state, Zombie);
    }

    #[test]
    fn test_zombie_is_terminal() {
        for to in ProcessState::ALL {
            assert!(!is_legal(Zombie, to), "Zombie -> {:?}", to);
        }
    }

    #[test]
    fn test_everything_but_zombie_can_finish() {
        for from in ProcessState::ALL {
            let expected = !matches!(from, Finished | Zombie);
            assert_eq!(is_legal(from, Finished), expected, "{:?}", from);
        }
    }

    #[test]
    fn test_only_finished_becomes_zombie() {
        for from in ProcessState::ALL {
            assert_eq!(is_legal(from, Zombie), from == Finished, "{:?}", from);
        }
    }

    #[test]
    fn test_blocked_states_unblock_to_runnable_only() {
        for from in [Waiting, Sleeping, Stopped] {
            assert!(is_legal(from, Ready));
            assert!(is_legal(from, IoReady));
            assert!(!is_legal(from, Running));
            assert!(!is_legal(from, Waiting));
        }
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(ProcessState::from_raw(2), Some(IoReady));
        assert_eq!(ProcessState::from_raw(8), None);
    }
}
