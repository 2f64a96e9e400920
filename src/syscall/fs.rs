//! Filesystem syscall contracts: open/close/read/write/readv/writev/ioctl/
//! stat64/lstat64/fcntl64.
//!
//! Every entry point here returns a signed word: nonnegative on success,
//! `-errno` on failure. Each function marshals user
//! pointers through `syscall::usercopy`, canonicalizes paths through
//! `syscall::path::compute_abs_path`, and dispatches to the VFS layer
//! (`crate::vfs`). Per-task state (handle table, CWD, scratch buffers) is
//! reached through `process::fs::with_process_fs`.

use crate::debugln;
use crate::process::fs::{with_process_fs, ARGS_COPYBUF_SIZE, IO_COPYBUF_SIZE, MAX_PATH};
use crate::sync::preemption::PreemptionGuard;
use crate::vfs::{self, VfsError};

use super::errno::{EBADF, EFAULT, EINVAL, EMFILE, ENOENT, ENOTDIR};
use super::path::compute_abs_path;
use super::usercopy::{copy_from_user, copy_str_from_user, copy_to_user, duplicate_user_path};

fn vfs_error_to_errno(err: VfsError) -> i64 {
    match err {
        VfsError::NotFound => ENOENT,
        VfsError::NotADirectory => ENOTDIR,
        // This kernel mounts only the read-only FAT engine; EINVAL is the
        // errno space's designated "operation not supported" code (shared
        // with fcntl64's blanket response).
        VfsError::ReadOnly => EINVAL,
    }
}

/// `open(user_path, flags, mode)`.
///
/// `flags`/`mode` are accepted but unused: this design mounts a read-only
/// filesystem with no file creation, so every open is effectively `O_RDONLY`
/// against an existing entry.
pub fn sys_open(user_path: *const u8, flags: u64, mode: u64) -> i64 {
    let _ = (flags, mode);

    let _preempt = PreemptionGuard::new();

    let outcome = with_process_fs(|state| -> i64 {
        let user_path_owned = match duplicate_user_path(user_path, &mut state.args_copybuf, MAX_PATH) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let abs = match compute_abs_path(&user_path_owned, state.cwd(), MAX_PATH) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let handle = match vfs::exvfs_open(&abs) {
            Ok(h) => h,
            Err(e) => return vfs_error_to_errno(e),
        };

        match state.install(handle) {
            Some(slot) => slot as i64,
            // `install` still took ownership of `handle` above; when no slot
            // is free it is simply dropped here, closing it. The table is
            // left unchanged.
            None => EMFILE,
        }
    });

    outcome.unwrap_or(EBADF)
}

/// `close(fd)`.
pub fn sys_close(fd: u64) -> i64 {
    let _preempt = PreemptionGuard::new();

    let outcome = with_process_fs(|state| -> i64 {
        match state.clear(fd as usize) {
            Some(handle) => {
                // Dropping the last reference here is `exvfs_close`: no
                // cross-process refcounting exists in this design, so the
                // handle's lifetime ends with this slot's release.
                drop(handle);
                0
            }
            None => EBADF,
        }
    });

    outcome.unwrap_or(EBADF)
}

/// `read(fd, buf, count)`.
pub fn sys_read(fd: u64, buf: *mut u8, count: u64) -> i64 {
    let fd = fd as usize;
    let clamped = core::cmp::min(count as usize, IO_COPYBUF_SIZE);

    let outcome = with_process_fs(|state| -> i64 {
        let handle = match state.get(fd) {
            Some(h) => h,
            None => return EBADF,
        };

        let n = {
            let guard = handle.shared();
            match guard.read_at(handle.offset(), &mut state.io_copybuf[..clamped]) {
                Ok(n) => n,
                Err(e) => return vfs_error_to_errno(e),
            }
        };

        // Offset advances whether or not the copy to user space below
        // succeeds: the bytes were genuinely read from the image, only the
        // hand-off to user space can still fail.
        handle.advance(n);

        if copy_to_user(buf, &state.io_copybuf[..n]) != 0 {
            return EFAULT;
        }

        n as i64
    });

    outcome.unwrap_or(EBADF)
}

/// `write(fd, buf, count)`.
pub fn sys_write(fd: u64, buf: *const u8, count: u64) -> i64 {
    let fd = fd as usize;
    let clamped = core::cmp::min(count as usize, IO_COPYBUF_SIZE);

    let outcome = with_process_fs(|state| -> i64 {
        // Copy from user into scratch before touching the handle at all, so
        // an EFAULT can never be observed after partial state has changed.
        {
            let copy_err = copy_from_user(buf, &mut state.io_copybuf[..clamped]);
            if copy_err != 0 {
                return EFAULT;
            }
        }

        let handle = match state.get(fd) {
            Some(h) => h,
            None => return EBADF,
        };

        let guard = handle.exclusive();
        match guard.write(&state.io_copybuf[..clamped]) {
            Ok(n) => {
                drop(guard);
                handle.advance(n);
                n as i64
            }
            Err(e) => vfs_error_to_errno(e),
        }
    });

    outcome.unwrap_or(EBADF)
}

/// On-disk (well, in-memory) layout of one `iovec`: a user pointer and
/// length, 16 bytes, matching the POSIX `struct iovec` this syscall ABI
/// mirrors.
const IOVEC_SIZE: usize = 16;

struct Iovec {
    base: u64,
    len: u64,
}

fn decode_iovec(raw: &[u8]) -> Iovec {
    let base = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let len = u64::from_le_bytes(raw[8..16].try_into().unwrap());
    Iovec { base, len }
}

/// `readv(fd, iov, iovcnt)`.
pub fn sys_readv(fd: u64, iov: u64, iovcnt: u64) -> i64 {
    readv_writev(fd, iov, iovcnt, false)
}

/// `writev(fd, iov, iovcnt)`.
pub fn sys_writev(fd: u64, iov: u64, iovcnt: u64) -> i64 {
    readv_writev(fd, iov, iovcnt, true)
}

fn readv_writev(fd: u64, iov: u64, iovcnt: u64, is_write: bool) -> i64 {
    let fd = fd as usize;
    let iovcnt = iovcnt as usize;

    let total_bytes = match iovcnt.checked_mul(IOVEC_SIZE) {
        Some(n) if n <= ARGS_COPYBUF_SIZE => n,
        _ => return EINVAL,
    };

    let outcome = with_process_fs(|state| -> i64 {
        if copy_from_user(iov as *const u8, &mut state.args_copybuf[..total_bytes]) != 0 {
            return EFAULT;
        }

        let handle = match state.get(fd) {
            Some(h) => h,
            None => return EBADF,
        };

        // Decode the iovec array up front: state.args_copybuf is about to be
        // reused as the per-segment payload scratch below.
        let mut segments: alloc::vec::Vec<Iovec> = alloc::vec::Vec::with_capacity(iovcnt);
        for i in 0..iovcnt {
            let off = i * IOVEC_SIZE;
            segments.push(decode_iovec(&state.args_copybuf[off..off + IOVEC_SIZE]));
        }

        let mut cumulative: usize = 0;
        let mut first_error: Option<i64> = None;

        if is_write {
            let guard = handle.exclusive();
            for seg in &segments {
                let want = core::cmp::min(seg.len as usize, IO_COPYBUF_SIZE);
                if copy_from_user(seg.base as *const u8, &mut state.io_copybuf[..want]) != 0 {
                    first_error = Some(EFAULT);
                    break;
                }
                match guard.write(&state.io_copybuf[..want]) {
                    Ok(n) => {
                        handle.advance(n);
                        cumulative += n;
                        if n < want {
                            break;
                        }
                    }
                    Err(e) => {
                        first_error = Some(vfs_error_to_errno(e));
                        break;
                    }
                }
            }
        } else {
            let guard = handle.shared();
            for seg in &segments {
                let want = core::cmp::min(seg.len as usize, IO_COPYBUF_SIZE);
                let n = match guard.read_at(handle.offset(), &mut state.io_copybuf[..want]) {
                    Ok(n) => n,
                    Err(e) => {
                        first_error = Some(vfs_error_to_errno(e));
                        break;
                    }
                };
                handle.advance(n);
                if copy_to_user(seg.base as *mut u8, &state.io_copybuf[..n]) != 0 {
                    first_error = Some(EFAULT);
                    break;
                }
                cumulative += n;
                if n < want {
                    break;
                }
            }
        }

        if cumulative > 0 {
            cumulative as i64
        } else {
            first_error.unwrap_or(0)
        }
    });

    outcome.unwrap_or(EBADF)
}

/// `ioctl(fd, request, argp)`.
pub fn sys_ioctl(fd: u64, request: u64, argp: u64) -> i64 {
    let fd = fd as usize;

    let outcome = with_process_fs(|state| -> i64 {
        let handle = match state.get(fd) {
            Some(h) => h,
            None => return EBADF,
        };
        let guard = handle.exclusive();
        match guard.ioctl(request as u32, argp as usize) {
            Ok(n) => n as i64,
            Err(e) => vfs_error_to_errno(e),
        }
    });

    outcome.unwrap_or(EBADF)
}

/// Fixed layout this kernel uses for `stat64`/`lstat64`'s output struct:
/// byte 0 is a directory flag (0/1), bytes 4..8 the file size (little-endian
/// `u32`), bytes 8..12 the first cluster number (little-endian `u32`).
const STAT_BUF_SIZE: usize = 12;

fn encode_stat(stat: vfs::Stat) -> [u8; STAT_BUF_SIZE] {
    let mut buf = [0u8; STAT_BUF_SIZE];
    buf[0] = stat.is_directory as u8;
    buf[4..8].copy_from_slice(&stat.size.to_le_bytes());
    buf[8..12].copy_from_slice(&stat.first_cluster.to_le_bytes());
    buf
}

fn stat_impl(user_path: *const u8, user_statbuf: *mut u8) -> i64 {
    let _preempt = PreemptionGuard::new();

    let outcome = with_process_fs(|state| -> i64 {
        let mut path_scratch = [0u8; MAX_PATH];
        let user_path_str = match copy_str_from_user(user_path, &mut path_scratch) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let abs = match compute_abs_path(user_path_str, state.cwd(), MAX_PATH) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let handle = match vfs::exvfs_open(&abs) {
            Ok(h) => h,
            Err(e) => return vfs_error_to_errno(e),
        };

        let stat = {
            let guard = handle.shared();
            guard.stat()
        };
        vfs::exvfs_close(handle);

        let encoded = encode_stat(stat);
        if copy_to_user(user_statbuf, &encoded) != 0 {
            return EFAULT;
        }

        0
    });

    outcome.unwrap_or(EBADF)
}

/// `stat64(path, statbuf)`.
pub fn sys_stat64(user_path: *const u8, user_statbuf: *mut u8) -> i64 {
    stat_impl(user_path, user_statbuf)
}

/// `lstat64(path, statbuf)`: this design has no symbolic links, so it is
/// specified to behave identically to `stat64`.
pub fn sys_lstat64(user_path: *const u8, user_statbuf: *mut u8) -> i64 {
    stat_impl(user_path, user_statbuf)
}

/// `fcntl64(fd, cmd, arg)`: unsupported in this design. Every command
/// returns `-EINVAL`, but recognized command numbers are still logged for
/// observability rather than silently folded into the unrecognized case.
pub fn sys_fcntl64(fd: u64, cmd: u64, arg: u64) -> i64 {
    let _ = (fd, arg);

    const F_DUPFD: u64 = 0;
    const F_GETFD: u64 = 1;
    const F_SETFD: u64 = 2;
    const F_GETFL: u64 = 3;
    const F_SETFL: u64 = 4;

    let name = match cmd {
        F_DUPFD => Some("F_DUPFD"),
        F_GETFD => Some("F_GETFD"),
        F_SETFD => Some("F_SETFD"),
        F_GETFL => Some("F_GETFL"),
        F_SETFL => Some("F_SETFL"),
        _ => None,
    };

    match name {
        Some(name) => debugln!("syscall: fcntl64 recognized command {} (unsupported)", name),
        None => debugln!("syscall: fcntl64 unrecognized command {}", cmd),
    }

    EINVAL
}
