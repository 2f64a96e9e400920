//! The coarse "preemption disabled" gate the syscall layer wraps around
//! handle-table slot allocation/release, CWD reads, and the
//! `exvfs_open`/`exvfs_close` calls themselves.
//!
//! On this single-core, timer-interrupt-driven round-robin kernel, disabling
//! preemption *is* masking interrupts (there is no separate scheduler-yield
//! primitive to gate) — so this is `sync::spinlock::SpinLockGuard`'s
//! restore-on-drop discipline without the `AtomicBool`, since nothing here is
//! shared across a lock; it only needs to stop this CPU from being
//! rescheduled away mid-region.

use crate::arch::interrupts;

/// RAII guard: preemption is disabled for as long as this value lives.
pub struct PreemptionGuard {
    interrupts_were_enabled: bool,
}

impl PreemptionGuard {
    /// Disables preemption, returning a guard that restores the prior state
    /// on drop.
    pub fn new() -> Self {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();
        PreemptionGuard { interrupts_were_enabled }
    }
}

impl Default for PreemptionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptionGuard {
    fn drop(&mut self) {
        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}
