//! Multitasker configuration
//!
//! Compile-time defaults live in [`constants`]. A [`Config`] built from them
//! can be adjusted with the `with_*` builders before the process manager is
//! created; [`Config::validate`] rejects combinations the scheduler cannot
//! represent.

use log::LevelFilter;

use crate::error::{KResult, KernelError};

/// Default scheduling and table limits
pub mod constants {
    /// Descriptor table capacity (pids 0..MAX_PROCESSES)
    pub const MAX_PROCESSES: usize = 256;
    /// Number of priority classes (0 is the most urgent)
    pub const PRIORITY_LEVELS: usize = 8;
    /// Upper bound on priority classes (one bit per class in the ready summary)
    pub const MAX_PRIORITY_LEVELS: usize = 32;
    /// Priority given to new processes when none is requested
    pub const DEFAULT_PRIORITY: u8 = 3;
    /// Timer ticks a process may run before it is preempted
    pub const TIME_SLICE_TICKS: u32 = 5;
    /// Maximum argv entries per process
    pub const MAX_ARGS: usize = 64;
    /// Maximum bytes in a process name
    pub const PROCESS_NAME_LENGTH: usize = 64;
    /// Stack allocated for each new PCB
    pub const STACK_SIZE: usize = 16384;
    /// Priority classes an I/O completion jumps on its next dispatch
    pub const IO_PRIORITY_BOOST: u8 = 1;
    /// Ticks in a ready queue before a process ages into the next class
    pub const AGING_THRESHOLD_TICKS: u64 = 20;
    /// Ticks per CPU-percent sampling window
    pub const CPU_PERCENT_WINDOW_TICKS: u64 = 100;
    /// Ticks between orphan-reap passes
    pub const REAP_INTERVAL_TICKS: u64 = 50;
    /// Maximum words a syscall may take besides its function number
    pub const MAX_SYSCALL_ARGS: usize = 8;
}

/// Runtime configuration for the process manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_processes: usize,
    pub priority_levels: usize,
    pub default_priority: u8,
    pub time_slice: u32,
    pub max_args: usize,
    pub stack_size: usize,
    pub io_boost: u8,
    pub aging_threshold: u64,
    pub cpu_window: u64,
    pub reap_interval: u64,
    /// Force flag used by the single-argument kill
    pub default_kill_force: bool,
    pub log_level: LevelFilter,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            max_processes: constants::MAX_PROCESSES,
            priority_levels: constants::PRIORITY_LEVELS,
            default_priority: constants::DEFAULT_PRIORITY,
            time_slice: constants::TIME_SLICE_TICKS,
            max_args: constants::MAX_ARGS,
            stack_size: constants::STACK_SIZE,
            io_boost: constants::IO_PRIORITY_BOOST,
            aging_threshold: constants::AGING_THRESHOLD_TICKS,
            cpu_window: constants::CPU_PERCENT_WINDOW_TICKS,
            reap_interval: constants::REAP_INTERVAL_TICKS,
            default_kill_force: false,
            log_level: LevelFilter::Info,
        }
    }

    pub const fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub const fn with_priority_levels(mut self, levels: usize, default_priority: u8) -> Self {
        self.priority_levels = levels;
        self.default_priority = default_priority;
        self
    }

    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    pub const fn with_max_args(mut self, max_args: usize) -> Self {
        self.max_args = max_args;
        self
    }

    pub const fn with_aging_threshold(mut self, ticks: u64) -> Self {
        self.aging_threshold = ticks;
        self
    }

    pub const fn with_reap_interval(mut self, ticks: u64) -> Self {
        self.reap_interval = ticks;
        self
    }

    pub const fn with_cpu_window(mut self, ticks: u64) -> Self {
        self.cpu_window = ticks;
        self
    }

    pub const fn with_default_kill_force(mut self, force: bool) -> Self {
        self.default_kill_force = force;
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Check that the scheduler can represent this configuration
    pub fn validate(&self) -> KResult<()> {
        if self.max_processes < 2 || self.max_processes > u32::MAX as usize {
            return Err(KernelError::InvalidArgument);
        }
        if self.priority_levels == 0 || self.priority_levels > constants::MAX_PRIORITY_LEVELS {
            return Err(KernelError::InvalidArgument);
        }
        if self.default_priority as usize >= self.priority_levels {
            return Err(KernelError::InvalidArgument);
        }
        if self.time_slice == 0 || self.cpu_window == 0 || self.reap_interval == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.stack_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::new().validate().is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_priorities() {
        let config = Config::new().with_priority_levels(33, 0);
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));

        let config = Config::new().with_priority_levels(4, 4);
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_rejects_tiny_table() {
        let config = Config::new().with_max_processes(1);
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_builders() {
        let config = Config::new()
            .with_time_slice(2)
            .with_default_kill_force(true)
            .with_max_args(4);
        assert_eq!(config.time_slice, 2);
        assert!(config.default_kill_force);
        assert_eq!(config.max_args, 4);
    }
}
