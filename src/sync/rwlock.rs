//! Spin-based reader/writer lock with interrupt masking.
//!
//! Generalizes [`super::spinlock::SpinLock`] to the VFS handle's shared
//! (`shlock`/`shunlock`) / exclusive (`exlock`/`exunlock`) locking contract:
//! readers may hold the lock concurrently, writers and `ioctl` are
//! exclusive. Same restore-on-drop interrupt discipline as `SpinLock`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicIsize, Ordering};

use crate::arch::interrupts;

/// Lock state: `0` unlocked, `-1` held exclusively, `n > 0` held by `n` readers.
const UNLOCKED: isize = 0;
const EXCLUSIVE: isize = -1;

pub struct RwLock<T> {
    state: AtomicIsize,
    data: UnsafeCell<T>,
}

impl<T> RwLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicIsize::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock for shared (reader) access. Concurrent readers are
    /// allowed; blocks while a writer holds the lock.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current == EXCLUSIVE {
                core::hint::spin_loop();
                continue;
            }
            if self
                .state
                .compare_exchange(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        RwLockReadGuard { lock: self, interrupts_were_enabled }
    }

    /// Acquires the lock for exclusive (writer/ioctl) access.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        while self
            .state
            .compare_exchange(UNLOCKED, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        RwLockWriteGuard { lock: self, interrupts_were_enabled }
    }
}

pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the lock guarantees no writer holds `data` while readers exist.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}

pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the lock guarantees exclusive access while this guard lives.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the lock guarantees exclusive access while this guard lives.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(UNLOCKED, Ordering::Release);
        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}

// SAFETY:
// - Access to `data` is synchronized via the reader/writer state machine.
// - `T: Send` ensures it is safe to transfer ownership across threads/CPUs.
unsafe impl<T: Send> Sync for RwLock<T> {}
unsafe impl<T: Send> Send for RwLock<T> {}
