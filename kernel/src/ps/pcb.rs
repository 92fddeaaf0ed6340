//! Process Control Block
//!
//! One PCB per live pid, for full processes and for threads alike. A
//! `Thread` PCB is an ordinary process that happens to share its parent's
//! address space and descriptor table; there is no separate kernel thread
//! object.
//!
//! PCBs are owned by the descriptor table. Everything else refers to them by
//! pid; `parent` is a lookup key, not a reference that keeps the parent alive.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use x86_64::VirtAddr;

use crate::config::constants::PROCESS_NAME_LENGTH;
use crate::ke::{ProcessState, ThreadContext};
use crate::mm::AddressSpaceId;

/// Process identifier; also the descriptor table slot index
pub type Pid = u32;

/// Pid of the kernel process
pub const KERNEL_PID: Pid = 0;

/// Exit code recorded for a process terminated by kill
pub const EXIT_CODE_KILLED: i32 = -1;

/// Process type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessType {
    /// Owns its address space and descriptor table
    Normal = 0,
    /// Shares its parent's address space and descriptor table
    Thread = 1,
}

impl ProcessType {
    pub fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(ProcessType::Normal),
            1 => Some(ProcessType::Thread),
            _ => None,
        }
    }
}

/// Privilege level (ring); numerically lower is more trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Privilege {
    Supervisor = 0,
    User = 3,
}

impl Privilege {
    pub fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Privilege::Supervisor),
            3 => Some(Privilege::User),
            _ => None,
        }
    }

    /// `self` is strictly more trusted than `other`
    #[inline]
    pub fn exceeds(self, other: Privilege) -> bool {
        (self as u8) < (other as u8)
    }
}

bitflags! {
    /// Per-process flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessFlags: u32 {
        /// Nobody will join this process; reap as soon as it finishes
        const DETACHED = 1 << 0;
        /// Created through the trusted loader path
        const TRUSTED  = 1 << 1;
        /// Next dispatch gets the one-shot I/O priority boost
        const IO_BOOST = 1 << 2;
        /// Terminated by kill rather than exit
        const KILLED   = 1 << 3;
        /// Not dispatched yet; the processor prepares its first entry
        const FRESH    = 1 << 4;
    }
}

/// What a `Waiting` process is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Join: waiting for the pid to finish
    Join(Pid),
    /// Device completion
    Io,
}

/// Thread start context, passed by value from the caller
///
/// The kernel copies this out of user memory at spawn time; the routine
/// starts with `argument` as its first parameter and its return value
/// becomes the thread's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ThreadStart {
    /// Address of `extern "C" fn(usize) -> isize`
    pub routine: usize,
    pub argument: usize,
}

/// Bounded process name
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProcessName {
    bytes: [u8; PROCESS_NAME_LENGTH],
    len: u8,
}

impl ProcessName {
    /// Copy `name`, truncating at a character boundary if it is too long
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(PROCESS_NAME_LENGTH);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; PROCESS_NAME_LENGTH];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a &str cut at a char boundary.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    /// Raw bytes, zero padded
    pub fn raw(&self) -> &[u8; PROCESS_NAME_LENGTH] {
        &self.bytes
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process Control Block
#[derive(Debug)]
pub struct Pcb {
    pub pid: Pid,
    pub name: ProcessName,
    /// Owner user id
    pub uid: u32,
    pub process_type: ProcessType,
    /// Base priority class (0 is the most urgent)
    pub priority: u8,
    pub privilege: Privilege,
    /// Creator; a lookup key only
    pub parent: Option<Pid>,
    /// Thread children not yet reaped
    pub descendant_threads: u32,
    pub state: ProcessState,
    pub flags: ProcessFlags,

    // Execution
    pub context: ThreadContext,
    /// Stack allocated for this PCB
    pub stack: Option<VirtAddr>,
    pub stack_size: usize,
    pub address_space: AddressSpaceId,
    /// Descriptor table handle; threads share their parent's
    pub fd_table: u32,
    pub argv: Vec<String>,
    /// Set for `Thread` PCBs
    pub thread_start: Option<ThreadStart>,

    // Blocking
    pub wait: Option<WaitReason>,
    /// Exit code delivered to a joiner by the target's completion
    pub wait_result: Option<i32>,
    /// Tick at which a sleeper becomes ready
    pub wake_tick: Option<u64>,

    // Scheduling
    /// Ticks left in the current slice
    pub slice_left: u32,
    /// Class the PCB is queued in while runnable
    pub queue_class: u8,
    /// Tick the PCB last became ready (aging)
    pub ready_since: u64,

    // Accounting
    pub cpu_time: u64,
    pub window_cpu: u64,
    pub cpu_percent: u8,
    pub created_tick: u64,

    pub exit_code: Option<i32>,
}

impl Pcb {
    #[inline]
    pub fn is_thread(&self) -> bool {
        self.process_type == ProcessType::Thread
    }

    #[inline]
    pub fn is_waiting_on(&self, target: Pid) -> bool {
        self.state == ProcessState::Waiting && self.wait == Some(WaitReason::Join(target))
    }
}
