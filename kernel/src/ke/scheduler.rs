//! Priority ready queues
//!
//! One FIFO queue per priority class with a summary bitmap for O(1)
//! selection of the most urgent non-empty class. Class 0 is the most urgent.
//! Within a class, processes run in the order they became ready.
//!
//! The reschedule decision itself lives on the process manager; this module
//! only provides the queues and the vocabulary the two share.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::config::constants::MAX_PRIORITY_LEVELS;
use crate::ps::Pid;

/// What triggered a reschedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Timer interrupt; the running process keeps the CPU unless its slice
    /// is spent or a more urgent class is ready
    TimerTick,
    /// The running process gives up the rest of its slice
    VoluntaryYield,
    /// The running process has already left `Running` (blocked or finished)
    BlockingCall,
}

/// Outcome of a reschedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep running the same process
    Continue(Pid),
    /// Save `prev` (if any) and restore `next`
    Switch { prev: Option<Pid>, next: Pid },
    /// Nothing is runnable; idle until the next interrupt
    Idle { prev: Option<Pid> },
}

/// Per-class FIFO ready queues
pub struct ReadyQueues {
    queues: Vec<VecDeque<Pid>>,
    /// Bit n set when class n is non-empty
    summary: u32,
}

impl ReadyQueues {
    pub fn new(levels: usize) -> Self {
        let levels = levels.clamp(1, MAX_PRIORITY_LEVELS);
        let mut queues = Vec::with_capacity(levels);
        queues.resize_with(levels, VecDeque::new);
        Self { queues, summary: 0 }
    }

    #[inline]
    pub fn levels(&self) -> usize {
        self.queues.len()
    }

    /// Clamp a class into range
    #[inline]
    pub fn class_of(&self, priority: u8) -> u8 {
        (priority as usize).min(self.queues.len() - 1) as u8
    }

    /// Append at the tail of `class`
    pub fn enqueue(&mut self, pid: Pid, class: u8) {
        let class = self.class_of(class) as usize;
        self.queues[class].push_back(pid);
        self.summary |= 1 << class;
    }

    /// Remove the head of the most urgent non-empty class
    pub fn dequeue(&mut self) -> Option<(Pid, u8)> {
        let class = self.highest_class()? as usize;
        let pid = self.queues[class].pop_front()?;
        if self.queues[class].is_empty() {
            self.summary &= !(1 << class);
        }
        Some((pid, class as u8))
    }

    /// Most urgent non-empty class
    #[inline]
    pub fn highest_class(&self) -> Option<u8> {
        if self.summary == 0 {
            None
        } else {
            Some(self.summary.trailing_zeros() as u8)
        }
    }

    /// Remove `pid` from `class`; false if it was not queued there
    pub fn remove(&mut self, pid: Pid, class: u8) -> bool {
        let class = self.class_of(class) as usize;
        let queue = &mut self.queues[class];
        let Some(index) = queue.iter().position(|&p| p == pid) else {
            return false;
        };
        queue.remove(index);
        if queue.is_empty() {
            self.summary &= !(1 << class);
        }
        true
    }

    /// Remove and return, in queue order, every pid of `class` matching `pred`
    pub fn take_matching<F>(&mut self, class: u8, mut pred: F) -> Vec<Pid>
    where
        F: FnMut(Pid) -> bool,
    {
        let class = self.class_of(class) as usize;
        let mut taken = Vec::new();
        self.queues[class].retain(|&pid| {
            if pred(pid) {
                taken.push(pid);
                false
            } else {
                true
            }
        });
        if self.queues[class].is_empty() {
            self.summary &= !(1 << class);
        }
        taken
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.queues.iter().any(|q| q.contains(&pid))
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.summary == 0
    }

    pub fn class_len(&self, class: u8) -> usize {
        self.queues[self.class_of(class) as usize].len()
    }
}
