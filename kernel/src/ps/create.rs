//! Process and Thread Creation
//!
//! # Process Creation
//! A `Normal` process gets a fresh address space (or the one the loader
//! mapped its image into), its own descriptor table and a new stack. Its
//! initial context starts at the image entry with `argc` in the first
//! argument register.
//!
//! # Thread Creation
//! A `Thread` shares the caller's address space and descriptor table. It
//! gets its own stack and starts at the routine of its [`ThreadStart`] with
//! the argument as its only parameter.
//!
//! # Validation
//! Checked in order, before any resource is taken:
//! 1. null entry point
//! 2. argument count
//! 3. entry point inside the image's code region
//! 4. privilege escalation outside the trusted loader path
//! 5. a user caller asking for a more urgent class than its own
//!
//! A full table is retried once after a reap pass.
//!
//! An empty name becomes `<parent>-thread-<pid>` or `<parent>-process-<pid>`.

use alloc::string::String;
use alloc::vec::Vec;

use x86_64::VirtAddr;

use super::manager::ProcessManager;
use super::pcb::{Pcb, Pid, Privilege, ProcessFlags, ProcessName, ProcessType, ThreadStart};
use crate::error::{KResult, KernelError};
use crate::ke::{ProcessState, ThreadContext};
use crate::ldr::ProgramImage;

/// What to start
#[derive(Debug, Clone)]
pub enum SpawnKind {
    Process(ProgramImage),
    Thread(ThreadStart),
}

/// Creation request
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub kind: SpawnKind,
    pub name: String,
    /// `None` inherits the caller's privilege
    pub privilege: Option<Privilege>,
    /// `None` uses the default (processes) or the caller's (threads)
    pub priority: Option<u8>,
    /// `None` inherits the caller's uid
    pub uid: Option<u32>,
    /// Ready immediately, or created `Stopped` until resumed
    pub run_immediately: bool,
    /// Created by the kernel's trusted loader path
    pub trusted_loader: bool,
}

impl SpawnRequest {
    pub fn process(image: ProgramImage, name: &str) -> Self {
        Self::new(SpawnKind::Process(image), name)
    }

    pub fn thread(start: ThreadStart, name: &str) -> Self {
        Self::new(SpawnKind::Thread(start), name)
    }

    fn new(kind: SpawnKind, name: &str) -> Self {
        Self {
            kind,
            name: String::from(name),
            privilege: None,
            priority: None,
            uid: None,
            run_immediately: true,
            trusted_loader: false,
        }
    }

    pub fn privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = Some(privilege);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn owner(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Create `Stopped`
    pub fn stopped(mut self) -> Self {
        self.run_immediately = false;
        self
    }

    pub fn trusted(mut self) -> Self {
        self.trusted_loader = true;
        self
    }

    fn entry(&self) -> KResult<VirtAddr> {
        match &self.kind {
            SpawnKind::Process(image) => Ok(image.entry),
            SpawnKind::Thread(start) => {
                VirtAddr::try_new(start.routine as u64).map_err(|_| KernelError::BadAddress)
            }
        }
    }
}

impl ProcessManager {
    /// Create a process or thread on behalf of `caller`
    pub fn spawn(&mut self, caller: Pid, request: SpawnRequest) -> KResult<Pid> {
        let parent = self.table.lookup(caller)?;
        if parent.state.is_dead() {
            return Err(KernelError::NoSuchProcess);
        }
        let parent_privilege = parent.privilege;
        let parent_priority = parent.priority;
        let parent_uid = parent.uid;
        let parent_space = parent.address_space;
        let parent_fd_table = parent.fd_table;
        let parent_name = String::from(parent.name.as_str());

        let entry = request.entry()?;
        if entry.is_null() {
            return Err(KernelError::NullParameter);
        }

        if let SpawnKind::Process(image) = &request.kind {
            if image.argv.len() > self.config.max_args {
                log::warn!(
                    target: "ps::create",
                    "'{}': {} arguments exceeds limit {}",
                    request.name,
                    image.argv.len(),
                    self.config.max_args
                );
                return Err(KernelError::ArgumentCount);
            }
            if !image.entry_in_code() {
                return Err(KernelError::InvalidArgument);
            }
        }

        let privilege = request.privilege.unwrap_or(parent_privilege);
        if request.trusted_loader && parent_privilege != Privilege::Supervisor {
            return Err(KernelError::Permission);
        }
        if privilege.exceeds(parent_privilege) && !request.trusted_loader {
            log::warn!(
                target: "ps::create",
                "pid {} denied {:?} spawn of '{}'",
                caller,
                privilege,
                request.name
            );
            return Err(KernelError::Permission);
        }

        let is_thread = matches!(request.kind, SpawnKind::Thread(_));
        let user_caller = parent_privilege == Privilege::User;
        let priority = match request.priority {
            Some(priority) => priority,
            None if is_thread => parent_priority,
            // A user caller's default never outranks the caller itself
            None if user_caller => self.config.default_priority.max(parent_priority),
            None => self.config.default_priority,
        };
        if priority as usize >= self.config.priority_levels {
            return Err(KernelError::InvalidArgument);
        }
        if user_caller && priority < parent_priority {
            log::warn!(
                target: "ps::create",
                "pid {} denied priority {} for '{}' (own priority {})",
                caller,
                priority,
                request.name,
                parent_priority
            );
            return Err(KernelError::Permission);
        }

        let pid = match self.table.next_free_pid() {
            Some(pid) => pid,
            None => {
                self.reap_zombies();
                self.table.next_free_pid().ok_or(KernelError::NoFree)?
            }
        };

        let name = if request.name.is_empty() {
            let kind = if is_thread { "thread" } else { "process" };
            alloc::format!("{}-{}-{}", parent_name, kind, pid)
        } else {
            request.name.clone()
        };

        // Resources
        let stack_size = self.config.stack_size;
        let stack = self.memory.allocate(stack_size).ok_or(KernelError::OutOfMemory)?;

        let (address_space, fd_table) = match &request.kind {
            SpawnKind::Process(image) => {
                let space = match image.address_space {
                    Some(space) => space,
                    None => match self.memory.create_address_space() {
                        Some(space) => space,
                        None => {
                            self.memory.release(stack);
                            return Err(KernelError::OutOfMemory);
                        }
                    },
                };
                let fd_table = self.next_fd_table;
                self.next_fd_table = self.next_fd_table.wrapping_add(1).max(1);
                (space, fd_table)
            }
            SpawnKind::Thread(_) => (parent_space, parent_fd_table),
        };

        let stack_top = stack + stack_size as u64;
        let (context, process_type, thread_start, argv) = match request.kind {
            SpawnKind::Process(image) => {
                let argc = image.argv.len() as u64;
                (
                    ThreadContext::for_entry(entry, stack_top, argc, 0),
                    ProcessType::Normal,
                    None,
                    image.argv,
                )
            }
            SpawnKind::Thread(start) => (
                ThreadContext::for_entry(entry, stack_top, start.argument as u64, 0),
                ProcessType::Thread,
                Some(start),
                Vec::new(),
            ),
        };

        let mut flags = ProcessFlags::FRESH;
        if request.trusted_loader {
            flags.insert(ProcessFlags::TRUSTED);
        }
        let state = if request.run_immediately {
            ProcessState::Ready
        } else {
            ProcessState::Stopped
        };
        let now = self.ticks;

        let pcb = Pcb {
            pid,
            name: ProcessName::new(&name),
            uid: request.uid.unwrap_or(parent_uid),
            process_type,
            priority,
            privilege,
            parent: Some(caller),
            descendant_threads: 0,
            state,
            flags,
            context,
            stack: Some(stack),
            stack_size,
            address_space,
            fd_table,
            argv,
            thread_start,
            wait: None,
            wait_result: None,
            wake_tick: None,
            slice_left: self.config.time_slice,
            queue_class: priority,
            ready_since: now,
            cpu_time: 0,
            window_cpu: 0,
            cpu_percent: 0,
            created_tick: now,
            exit_code: None,
        };

        if let Err(e) = self.table.install(pcb) {
            self.memory.release(stack);
            if !is_thread && address_space != parent_space {
                self.memory.destroy_address_space(address_space);
            }
            return Err(e);
        }

        self.add_space_ref(address_space);
        if is_thread {
            if let Some(parent) = self.table.get_mut(caller) {
                parent.descendant_threads += 1;
            }
        }
        if request.run_immediately {
            self.ready.enqueue(pid, priority);
        }

        log::info!(
            target: "ps::create",
            "created {} {} '{}' (parent {}, {:?}, priority {}, {})",
            if is_thread { "thread" } else { "process" },
            pid,
            name,
            caller,
            privilege,
            priority,
            address_space
        );
        Ok(pid)
    }

    /// Start a program image as a new `Normal` process
    pub fn spawn_process(&mut self, caller: Pid, image: ProgramImage, name: &str) -> KResult<Pid> {
        self.spawn(caller, SpawnRequest::process(image, name))
    }

    /// Start a thread sharing the caller's address space
    pub fn spawn_thread(&mut self, caller: Pid, start: ThreadStart, name: &str) -> KResult<Pid> {
        self.spawn(caller, SpawnRequest::thread(start, name))
    }
}
