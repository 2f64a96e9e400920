//! Syscall table and dispatcher entry point.
//!
//! The low-level interrupt glue passes `(syscall_nr, arg0..arg3)` into
//! [`dispatch`]. Types/constants live in `types`, kernel dispatch logic in
//! `dispatch`, and user/raw wrappers in their dedicated submodules.

mod dispatch;
mod types;

pub mod abi;
pub mod errno;
pub mod fs;
pub mod path;
pub mod usercopy;

/// Compatibility path: keep `syscall::arch::syscall_raw::*` stable for existing callers.
pub mod arch {
    pub mod syscall_raw {
        #[allow(unused_imports)]
        pub use super::super::abi::{syscall0, syscall1, syscall2, syscall3};
    }
}

/// Safe user-space syscall wrappers.
#[allow(dead_code)]
pub mod user;

#[allow(unused_imports)]
pub use dispatch::dispatch;

#[allow(unused_imports)]
pub use types::{
    decode_result, user_alias_rip, user_alias_va_for_kernel, SysError, SyscallId,
    SYSCALL_ERR_INVALID_ARG, SYSCALL_ERR_UNSUPPORTED, SYSCALL_OK,
};

/// Start of the canonical higher half this kernel maps itself into; any user
/// buffer argument that reaches into this range (or wraps around `usize`) is
/// rejected rather than dereferenced.
const KERNEL_HALF_BASE: usize = 0xFFFF_8000_0000_0000;

/// Validates that `ptr..ptr+len` is a plausible user-space buffer.
///
/// This is a syscall-boundary sanity check, not a substitute for real
/// fault-detecting user copy: it rejects null pointers, pointer-arithmetic
/// overflow, and addresses in the kernel's higher half, but it cannot tell
/// an unmapped user address from a mapped one (that needs the page-fault
/// plumbing this crate's scope excludes; see `usercopy`).
pub(crate) fn is_valid_user_buffer(ptr: *const u8, len: usize) -> bool {
    if ptr.is_null() {
        return false;
    }
    let start = ptr as usize;
    let end = match start.checked_add(len) {
        Some(end) => end,
        None => return false,
    };
    start < KERNEL_HALF_BASE && end <= KERNEL_HALF_BASE
}
