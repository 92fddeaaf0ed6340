//! Process Manager (ps)
//!
//! The process manager handles process and thread lifecycle:
//!
//! - **PCB**: One control block per pid, processes and threads alike
//! - **Descriptor Table**: Fixed arena of PCBs indexed by pid
//! - **Process Creation**: Fresh address space, stack and descriptor table
//! - **Thread Creation**: Shares the parent's address space
//! - **Join / Exit / Kill**: Exit codes delivered to joiners, zombies reaped
//! - **Introspection**: Per-process snapshots for listings
//!
//! # Process Structure
//!
//! A PCB holds:
//! - Identity (pid, parent, uid, name, type)
//! - Scheduling state (state, priority class, slice, aging stamp)
//! - Saved register context and stack
//! - Address space and descriptor table handles
//! - Wait record and exit code
//!
//! # Ownership
//!
//! ```text
//!   ProcessManager
//!   ├── ProcessTable ── Box<Pcb> per occupied slot
//!   ├── ReadyQueues ─── pids
//!   └── current ─────── pid
//! ```
//!
//! Nothing outside the table holds a reference to a PCB.

pub mod create;
pub mod info;
pub mod lifecycle;
pub mod manager;
pub mod pcb;
pub mod table;

pub use create::{SpawnKind, SpawnRequest};
pub use info::{ProcessInfo, NO_EXIT_CODE, NO_PARENT};
pub use lifecycle::JoinStatus;
pub use manager::{ProcessManager, SchedulerStats};
pub use pcb::{
    Pcb, Pid, Privilege, ProcessFlags, ProcessName, ProcessType, ThreadStart, WaitReason,
    EXIT_CODE_KILLED, KERNEL_PID,
};
pub use table::ProcessTable;
