//! User/kernel memory marshalling primitives.
//!
//! This kernel has no page-fault recovery path that turns a fault mid-`memcpy`
//! into an `EFAULT` return, so fault detection here is the same address-range
//! sanity check `syscall::is_valid_user_buffer` already applies in
//! `syscall::dispatch`'s `WriteSerial`/`WriteConsole` handlers: reject null
//! pointers, pointer-arithmetic overflow, and addresses in the kernel's
//! higher half before ever touching the buffer. A real MMU-backed
//! implementation would extend this with a page-fault-recovery hook; this
//! boundary check is what stands in for it today.

use alloc::string::String;

use crate::syscall::errno::EFAULT;
use crate::syscall::is_valid_user_buffer;

/// Copies `dest.len()` bytes from the user pointer `src` into `dest`.
///
/// Returns `0` on success, `-EFAULT` if `src..src+dest.len()` is not a
/// plausible user-space range.
pub fn copy_from_user(src: *const u8, dest: &mut [u8]) -> i64 {
    if !is_valid_user_buffer(src, dest.len()) {
        return EFAULT;
    }
    // SAFETY: `is_valid_user_buffer` checked that `src..src+dest.len()` lies
    // entirely within user canonical address space.
    let bytes = unsafe { core::slice::from_raw_parts(src, dest.len()) };
    dest.copy_from_slice(bytes);
    0
}

/// Copies `src` into the user pointer `dest`.
///
/// Returns `0` on success, `-EFAULT` if `dest..dest+src.len()` is not a
/// plausible user-space range.
pub fn copy_to_user(dest: *mut u8, src: &[u8]) -> i64 {
    if !is_valid_user_buffer(dest as *const u8, src.len()) {
        return EFAULT;
    }
    // SAFETY: `is_valid_user_buffer` checked that `dest..dest+src.len()` lies
    // entirely within user canonical address space.
    let bytes = unsafe { core::slice::from_raw_parts_mut(dest, src.len()) };
    bytes.copy_from_slice(src);
    0
}

/// Copies a NUL-terminated string from user space into `scratch`, stopping
/// at the first NUL byte or `scratch.len()`, whichever comes first.
///
/// Returns the string slice (not including the NUL) on success. Returns
/// `Err(-EFAULT)` if the user range is invalid, `Err(-EINVAL)` if the bytes
/// copied are not valid UTF-8 (this kernel has no notion of a non-UTF-8
/// path), or `Err(-ENAMETOOLONG)` if no NUL byte appears within
/// `scratch.len()` bytes.
pub fn copy_str_from_user<'a>(src: *const u8, scratch: &'a mut [u8]) -> Result<&'a str, i64> {
    use crate::syscall::errno::{EINVAL, ENAMETOOLONG};

    if !is_valid_user_buffer(src, scratch.len()) {
        return Err(EFAULT);
    }
    // SAFETY: checked above; we only read, never write, past the NUL.
    let bytes = unsafe { core::slice::from_raw_parts(src, scratch.len()) };

    let len = match bytes.iter().position(|&b| b == 0) {
        Some(idx) => idx,
        None => return Err(ENAMETOOLONG),
    };

    scratch[..len].copy_from_slice(&bytes[..len]);
    core::str::from_utf8(&scratch[..len]).map_err(|_| EINVAL)
}

/// Duplicates a user-supplied path into an owned `String`, validating that
/// it is non-empty and fits within `max_len` (the design's `MAX_PATH`).
///
/// Combines the copy and the length check every path-taking syscall needs
/// before handing the result to `syscall::path::compute_abs_path`, which is
/// what actually resolves a relative path against the caller's cwd — so a
/// leading `/` is not required here. Returns `-ENAMETOOLONG` for an
/// over-length path and `-EINVAL` for an empty one.
pub fn duplicate_user_path(src: *const u8, scratch: &mut [u8], max_len: usize) -> Result<String, i64> {
    use crate::syscall::errno::{EINVAL, ENAMETOOLONG};

    let bound = core::cmp::min(scratch.len(), max_len);
    let path = copy_str_from_user(src, &mut scratch[..bound])?;

    if path.is_empty() {
        return Err(EINVAL);
    }
    if path.len() > max_len {
        return Err(ENAMETOOLONG);
    }

    Ok(String::from(path))
}
