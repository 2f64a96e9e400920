//! VFS layer: opaque filesystem + handle abstractions sitting on top of the
//! FAT engine, plus the mountpoint registry.
//!
//! The on-disk vtable this design specifies (`open`/`close`/`read`/`write`/
//! `ioctl`/`stat`/`shlock`/`shunlock`/`exlock`/`exunlock`) is realized here as
//! two Rust traits (`Filesystem`, `FsHandle`) plus a concrete [`Handle`] type
//! that owns the per-handle reader/writer lock. Rather than exposing
//! `shlock`/`shunlock`/`exlock`/`exunlock` as four separate dyn-dispatched
//! calls (which would force a handle to store a type-erased lock guard), the
//! lock wraps the handle itself: `Handle::shared()`/`Handle::exclusive()`
//! return RAII guards in the idiomatic Rust style already used by
//! `sync::spinlock::SpinLock`. The invariant this design actually requires —
//! linearizability per handle, with the lock held across an entire vectored
//! I/O operation — is preserved exactly; only the four-call mechanism is
//! replaced by ordinary guard scoping. See DESIGN.md.

pub mod fatfs;
pub mod mount;

use alloc::boxed::Box;
use core::fmt::{Display, Formatter};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors surfaced by the VFS layer, above the raw `FatError` engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    NotADirectory,
    /// Writing to a mounted filesystem that does not support it (this design
    /// mounts only the read-only FAT engine).
    ReadOnly,
}

impl Display for VfsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such file or directory"),
            Self::NotADirectory => f.write_str("not a directory"),
            Self::ReadOnly => f.write_str("filesystem is mounted read-only"),
        }
    }
}

/// Stat information returned by `stat64`/`lstat64`.
///
/// `lstat64` is specified to behave identically to `stat64` until symbolic
/// links exist in this design, so both syscalls build this same struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_directory: bool,
    pub size: u32,
    pub first_cluster: u32,
}

/// Per-open-file object a filesystem's `open` returns; the VFS and syscall
/// layer treat it as opaque beyond this trait.
pub trait FsHandle: Send {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, VfsError>;
    fn write(&self, buf: &[u8]) -> Result<usize, VfsError>;
    fn ioctl(&self, request: u32, argp: usize) -> Result<usize, VfsError>;
    fn stat(&self) -> Stat;
}

/// A mounted filesystem's vtable: the only operation this design's
/// read-only, single-mount-table model needs is `open`.
pub trait Filesystem: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn FsHandle>, VfsError>;
}

/// An open file: an opaque `FsHandle` plus the per-handle shared/exclusive
/// reader-writer lock. Created by [`exvfs_open`], destroyed by
/// [`exvfs_close`] (i.e. simply dropped — no cross-process refcounting, per
/// this design's non-shared-handle model).
pub struct Handle {
    inner: RwLock<Box<dyn FsHandle>>,
    /// Sequential cursor for `read`/`write`/`readv`/`writev`. `read_at`/`write`
    /// on [`FsHandle`] are pread/pwrite-style (caller-supplied offset), so the
    /// notion of "current stream position" the syscall layer needs lives here
    /// rather than inside the filesystem's own vop.
    stream_offset: AtomicUsize,
}

impl Handle {
    pub fn new(fs_handle: Box<dyn FsHandle>) -> Self {
        Handle { inner: RwLock::new(fs_handle), stream_offset: AtomicUsize::new(0) }
    }

    /// Acquires the handle's rwlock for shared (reader) access.
    pub fn shared(&self) -> RwLockReadGuard<'_, Box<dyn FsHandle>> {
        self.inner.read()
    }

    /// Acquires the handle's rwlock for exclusive (writer/ioctl) access.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, Box<dyn FsHandle>> {
        self.inner.write()
    }

    /// Current stream offset.
    pub fn offset(&self) -> usize {
        self.stream_offset.load(Ordering::Relaxed)
    }

    /// Advances the stream offset by `n` bytes.
    pub fn advance(&self, n: usize) {
        self.stream_offset.fetch_add(n, Ordering::Relaxed);
    }
}

/// Opens `path` by dispatching through the mountpoint table's longest-prefix
/// match.
pub fn exvfs_open(path: &str) -> Result<Handle, VfsError> {
    let fs = mount::get_mount(path).ok_or(VfsError::NotFound)?;
    let fs_handle = fs.open(path)?;
    Ok(Handle::new(fs_handle))
}

/// Closes a handle. This design's handles are owned per-process with no
/// cross-process refcounting, so closing is simply letting the `Handle`
/// (and therefore the `Box<dyn FsHandle>` it wraps) drop; this function
/// names that operation at its call site in the syscall layer.
pub fn exvfs_close(_handle: Handle) {}
