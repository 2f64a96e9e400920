//! Per-process filesystem state: the handle table, CWD, and syscall scratch
//! buffers the `syscall::fs` layer operates on.
//!
//! One slot per schedulable task ([`scheduler::MAX_TASKS`]), indexed by the
//! scheduler's task slot index so no separate process-id allocator is
//! needed at this design stage.

use alloc::string::String;
use alloc::sync::Arc;

use crate::scheduler;
use crate::sync::spinlock::SpinLock;
use crate::vfs::Handle;

/// Upper bound on simultaneously open handles per process.
pub const MAX_OPEN_HANDLES_PER_PROCESS: usize = 16;

/// Upper bound on a canonicalized absolute path, including the NUL byte a
/// C-style caller might expect; Rust strings here never carry that byte.
pub const MAX_PATH: usize = 256;

/// Scratch buffer used to stage a duplicated user path, or an `iovec` array
/// copied in from user space. Sized so `ARGS_COPYBUF_SIZE / 2 >= MAX_PATH`.
pub const ARGS_COPYBUF_SIZE: usize = 512;

/// Scratch buffer used to stage `read`/`write` payloads between user space
/// and a handle's data-plane operation.
pub const IO_COPYBUF_SIZE: usize = 4096;

/// Per-process filesystem state.
pub struct ProcessFsState {
    handles: [Option<Arc<Handle>>; MAX_OPEN_HANDLES_PER_PROCESS],
    /// Canonical absolute path. The empty string is a sentinel for `/`,
    /// chosen so this type's constructor can stay a `const fn` (an owned
    /// `String` cannot allocate `"/"` at const-eval time).
    cwd: String,
    pub args_copybuf: [u8; ARGS_COPYBUF_SIZE],
    pub io_copybuf: [u8; IO_COPYBUF_SIZE],
}

impl ProcessFsState {
    const fn new() -> Self {
        const EMPTY_HANDLE: Option<Arc<Handle>> = None;
        ProcessFsState {
            handles: [EMPTY_HANDLE; MAX_OPEN_HANDLES_PER_PROCESS],
            cwd: String::new(),
            args_copybuf: [0; ARGS_COPYBUF_SIZE],
            io_copybuf: [0; IO_COPYBUF_SIZE],
        }
    }

    /// Current working directory as a canonical absolute path (`/` when the
    /// empty-string sentinel is stored).
    pub fn cwd(&self) -> &str {
        if self.cwd.is_empty() {
            "/"
        } else {
            &self.cwd
        }
    }

    pub fn set_cwd(&mut self, new_cwd: &str) {
        self.cwd = if new_cwd == "/" { String::new() } else { String::from(new_cwd) };
    }

    /// Finds the lowest free slot and installs `handle`, returning its index.
    /// Returns `None` (maps to `-EMFILE`) when every slot is occupied.
    pub fn install(&mut self, handle: Handle) -> Option<usize> {
        let slot = self.handles.iter().position(|h| h.is_none())?;
        self.handles[slot] = Some(Arc::new(handle));
        Some(slot)
    }

    /// Looks up `fd`, returning `None` (maps to `-EBADF`) when out of range
    /// or the slot is empty.
    pub fn get(&self, fd: usize) -> Option<Arc<Handle>> {
        self.handles.get(fd)?.clone()
    }

    /// Clears `fd`'s slot, returning the handle that was installed there (if
    /// any) so the caller can drop it outside the process table lock.
    pub fn clear(&mut self, fd: usize) -> Option<Arc<Handle>> {
        self.handles.get_mut(fd)?.take()
    }
}

/// Table of per-task filesystem state, indexed by scheduler slot.
pub struct ProcessFsTable {
    tasks: [ProcessFsState; scheduler::MAX_TASKS],
}

impl ProcessFsTable {
    const fn new() -> Self {
        const EMPTY_STATE: ProcessFsState = ProcessFsState::new();
        ProcessFsTable { tasks: [EMPTY_STATE; scheduler::MAX_TASKS] }
    }
}

static PROCESS_TABLE: SpinLock<ProcessFsTable> = SpinLock::new(ProcessFsTable::new());

/// Runs `f` against the calling task's filesystem state.
///
/// Returns `None` when called outside a scheduled task context (no current
/// task id available); every syscall entry point is expected to run inside
/// one, so this is a defensive fallback rather than a normal path.
pub fn with_process_fs<R>(f: impl FnOnce(&mut ProcessFsState) -> R) -> Option<R> {
    let tid = scheduler::current_task_id()?;
    let mut table = PROCESS_TABLE.lock();
    Some(f(&mut table.tasks[tid]))
}
