//! IRQ-safe spinlock
//!
//! Protects the descriptor table and scheduler state. Critical sections are
//! short and O(1) in the common case; while the lock is held on bare metal,
//! interrupts are disabled so the timer handler can never spin on a lock its
//! own CPU already owns.
//!
//! # Usage
//! ```
//! use multitasker::ke::SpinLock;
//!
//! let lock = SpinLock::new(0u32);
//! {
//!     let mut guard = lock.lock();
//!     *guard += 1;
//! } // guard dropped, lock released, interrupt state restored
//! assert_eq!(*lock.lock(), 1);
//! ```

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Busy-wait lock that masks interrupts while held
pub struct SpinLock<T> {
    /// Held flag
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is free; interrupts stay off until the guard drops
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let interrupts_enabled = irq::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        SpinLockGuard {
            lock: self,
            interrupts_enabled,
        }
    }

    /// Single attempt; `None` if another holder has it
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let interrupts_enabled = irq::disable();

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard {
                lock: self,
                interrupts_enabled,
            })
        } else {
            irq::restore(interrupts_enabled);
            None
        }
    }

    /// Racy snapshot, for assertions and diagnostics
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Access to the protected value; dropping it unlocks and restores the
/// interrupt flag saved at acquisition
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    interrupts_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        irq::restore(self.interrupts_enabled);
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod irq {
    use x86_64::instructions::interrupts;

    /// Mask interrupts, reporting whether they had been enabled
    #[inline]
    pub fn disable() -> bool {
        let enabled = interrupts::are_enabled();
        interrupts::disable();
        enabled
    }

    #[inline]
    pub fn restore(enabled: bool) {
        if enabled {
            interrupts::enable();
        }
    }

    #[inline]
    pub fn enabled() -> bool {
        interrupts::are_enabled()
    }
}

// Hosted builds have no interrupt flag to manage.
#[cfg(all(not(all(target_arch = "x86_64", target_os = "none")), not(test)))]
mod irq {
    #[inline]
    pub fn disable() -> bool {
        false
    }

    #[inline]
    pub fn restore(_enabled: bool) {}

    #[inline]
    pub fn enabled() -> bool {
        false
    }
}

// Host tests model the flag per thread so masking can be asserted.
#[cfg(all(not(all(target_arch = "x86_64", target_os = "none")), test))]
mod irq {
    use std::cell::Cell;

    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub fn disable() -> bool {
        ENABLED.with(|flag| flag.replace(false))
    }

    pub fn restore(enabled: bool) {
        if enabled {
            ENABLED.with(|flag| flag.set(true));
        }
    }

    pub fn enabled() -> bool {
        ENABLED.with(Cell::get)
    }
}

/// Run `f` with interrupts masked, then restore the previous state
///
/// A context switch inside `f` is fine: the saved state lives on the
/// switching process's stack and is restored when it resumes.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let enabled = irq::disable();
    let result = f();
    irq::restore(enabled);
    result
}

/// Whether this CPU currently accepts interrupts
#[inline]
pub fn interrupts_enabled() -> bool {
    irq::enabled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock() {
        let lock = SpinLock::new(5);
        {
            let mut guard = lock.lock();
            assert!(lock.is_locked());
            *guard = 6;
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn test_guard_masks_and_restores_interrupts() {
        let lock = SpinLock::new(0);
        assert!(interrupts_enabled());
        {
            let _outer = lock.lock();
            assert!(!interrupts_enabled());
        }
        assert!(interrupts_enabled());

        without_interrupts(|| {
            drop(lock.lock());
            // Inner guard restores the masked state it found
            assert!(!interrupts_enabled());
        });
        assert!(interrupts_enabled());
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
