//! Filesystem syscall contract tests: open/close/read/write/readv/stat64/
//! lstat64/fcntl64, path canonicalization, and the per-process handle table.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::process::fs::with_process_fs;
use kaos_kernel::scheduler;
use kaos_kernel::syscall::errno::{EBADF, EINVAL, EMFILE, ENAMETOOLONG, ENOENT, ENOTDIR};
use kaos_kernel::syscall::fs;
use kaos_kernel::syscall::path::compute_abs_path;
use kaos_kernel::vfs::mount;

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();
    pmm::init(false);
    vmm::init(false);
    heap::init();
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

const SECTOR: usize = 512;

fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn write_short_entry(buf: &mut [u8], off: usize, name11: &[u8; 11], attr: u8, first_cluster: u32, size: u32) {
    buf[off..off + 11].copy_from_slice(name11);
    buf[off + 11] = attr;
    write_u16(buf, off + 20, ((first_cluster >> 16) & 0xFFFF) as u16);
    write_u16(buf, off + 26, (first_cluster & 0xFFFF) as u16);
    write_u32(buf, off + 28, size);
}

/// Builds a FAT16 fixture: root has "GREET.TXT" (content "Howdy") and an
/// "ADIR" subdirectory containing "NOTE.TXT" (content "Yo").
fn build_fixture() -> &'static [u8] {
    let mut buf = alloc::vec![0u8; 6 * SECTOR];

    write_u16(&mut buf, 11, SECTOR as u16);
    buf[13] = 1;
    write_u16(&mut buf, 14, 1);
    buf[16] = 1;
    write_u16(&mut buf, 17, 16);
    write_u16(&mut buf, 22, 1);
    write_u32(&mut buf, 32, 5003);

    let fat_start = SECTOR;
    write_u16(&mut buf, fat_start + 2 * 2, 0xFFFF);
    write_u16(&mut buf, fat_start + 3 * 2, 0xFFFF);
    write_u16(&mut buf, fat_start + 4 * 2, 0xFFFF);

    let root_start = 2 * SECTOR;
    write_short_entry(&mut buf, root_start, b"GREET   TXT", 0x20, 2, 5);
    write_short_entry(&mut buf, root_start + 32, b"ADIR       ", 0x10, 3, 0);

    buf[3 * SECTOR..3 * SECTOR + 5].copy_from_slice(b"Howdy");

    let adir_start = 4 * SECTOR;
    write_short_entry(&mut buf, adir_start, b"NOTE    TXT", 0x20, 4, 2);

    buf[5 * SECTOR..5 * SECTOR + 2].copy_from_slice(b"Yo");

    buf.leak()
}

fn ensure_mounted() {
    let image = build_fixture();
    unsafe {
        let _ = mount::mount_root(image.as_ptr(), image.len());
    }
}

fn user_path_buf(path: &str) -> [u8; 256] {
    let mut buf = [0u8; 256];
    buf[..path.len()].copy_from_slice(path.as_bytes());
    buf
}

/// Contract: a relative input is joined against `cwd`; an absolute input is
/// used as-is regardless of `cwd`.
#[test_case]
fn test_compute_abs_path_absolute_and_relative() {
    assert!(compute_abs_path("/a/b", "/anything", 256).unwrap() == "/a/b");
    assert!(compute_abs_path("b", "/a", 256).unwrap() == "/a/b");
    assert!(compute_abs_path("b", "/", 256).unwrap() == "/b");
}

/// Contract: `.` segments are dropped, `..` pops the preceding segment, and a
/// `..` at the root is simply absorbed rather than underflowing.
#[test_case]
fn test_compute_abs_path_dot_dot_and_root_absorption() {
    assert!(compute_abs_path("/a/./b/../c", "/", 256).unwrap() == "/a/c");
    assert!(compute_abs_path("/../../etc", "/", 256).unwrap() == "/etc");
    assert!(compute_abs_path(&alloc::format!("/{}", "x".repeat(300)), "/", 256) == Err(ENAMETOOLONG));
}

/// Contract: every `fcntl64` command returns `-EINVAL`, recognized or not.
#[test_case]
fn test_sys_fcntl64_always_einval() {
    assert!(fs::sys_fcntl64(0, 0, 0) == EINVAL); // F_DUPFD
    assert!(fs::sys_fcntl64(0, 1, 0) == EINVAL); // F_GETFD
    assert!(fs::sys_fcntl64(0, 999, 0) == EINVAL); // unrecognized
}

/// Contract: open -> read -> write(rejected) -> ioctl(rejected) -> close,
/// with the fd no longer usable afterward.
#[test_case]
fn test_sys_open_read_write_close_contract() {
    scheduler::force_current_task_for_test(Some(0));
    ensure_mounted();

    let path = user_path_buf("/GREET.TXT");
    let fd = fs::sys_open(path.as_ptr(), 0, 0);
    assert!(fd >= 0, "opening an existing file must succeed");

    let mut readbuf = [0u8; 16];
    let n = fs::sys_read(fd as u64, readbuf.as_mut_ptr(), 16);
    assert!(n == 5, "read must return the file's full 5-byte content in one call");
    assert!(&readbuf[..5] == &b"Howdy"[..]);

    let n2 = fs::sys_read(fd as u64, readbuf.as_mut_ptr(), 16);
    assert!(n2 == 0, "a read starting past EOF must return 0, not an error");

    let writebuf = b"nope!";
    assert!(
        fs::sys_write(fd as u64, writebuf.as_ptr(), writebuf.len() as u64) == EINVAL,
        "writing to the read-only mount must fail"
    );
    assert!(fs::sys_ioctl(fd as u64, 0, 0) == EINVAL, "ioctl against a read-only file must fail");

    assert!(fs::sys_close(fd as u64) == 0);
    assert!(fs::sys_close(fd as u64) == EBADF, "closing an already-closed fd must fail");
    assert!(
        fs::sys_read(fd as u64, readbuf.as_mut_ptr(), 16) == EBADF,
        "reading a closed fd must fail"
    );

    scheduler::force_current_task_for_test(None);
}

/// Contract: missing paths, non-directory traversal, and the synthetic root
/// directory are all handled distinctly.
#[test_case]
fn test_sys_open_error_paths_and_root_directory() {
    scheduler::force_current_task_for_test(Some(1));
    ensure_mounted();

    let missing = user_path_buf("/nope.txt");
    assert!(fs::sys_open(missing.as_ptr(), 0, 0) == ENOENT as i64);

    let through_file = user_path_buf("/GREET.TXT/x");
    assert!(fs::sys_open(through_file.as_ptr(), 0, 0) == ENOTDIR as i64);

    let root = user_path_buf("/");
    let fd = fs::sys_open(root.as_ptr(), 0, 0);
    assert!(fd >= 0, "the root directory must be openable");

    let mut buf = [0u8; 4];
    assert!(
        fs::sys_read(fd as u64, buf.as_mut_ptr(), 4) == 0,
        "reading a directory fd must return 0 bytes, not an error"
    );

    scheduler::force_current_task_for_test(None);
}

/// Contract: the per-process handle table is bounded; the 17th simultaneous
/// open on one process fails with `-EMFILE` and leaves the table untouched.
#[test_case]
fn test_sys_open_emfile_after_handle_table_fills() {
    scheduler::force_current_task_for_test(Some(2));
    ensure_mounted();

    let path = user_path_buf("/GREET.TXT");
    for expected_fd in 0i64..16i64 {
        let fd = fs::sys_open(path.as_ptr(), 0, 0);
        assert!(fd == expected_fd, "handles must be installed into the lowest free slot in order");
    }

    assert!(
        fs::sys_open(path.as_ptr(), 0, 0) == EMFILE,
        "the 17th simultaneous open on one process must fail with EMFILE"
    );

    scheduler::force_current_task_for_test(None);
}

/// Contract: `readv` returns bytes copied out before a mid-vector `EFAULT`,
/// not the error itself, once at least one segment has fully landed.
#[test_case]
fn test_sys_readv_cumulative_bytes_on_partial_efault() {
    scheduler::force_current_task_for_test(Some(3));
    ensure_mounted();

    let path = user_path_buf("/GREET.TXT");
    let fd = fs::sys_open(path.as_ptr(), 0, 0);
    assert!(fd >= 0);

    let mut seg0 = [0u8; 2];
    const INVALID_KERNEL_PTR: u64 = 0xFFFF_8000_0000_1000;

    let mut iov = [0u8; 32];
    write_u64(&mut iov, 0, seg0.as_mut_ptr() as u64);
    write_u64(&mut iov, 8, seg0.len() as u64);
    write_u64(&mut iov, 16, INVALID_KERNEL_PTR);
    write_u64(&mut iov, 24, 3);

    let ret = fs::sys_readv(fd as u64, iov.as_ptr() as u64, 2);
    assert!(ret == 2, "the first segment's 2 bytes must be returned, not the second segment's EFAULT");
    assert!(&seg0 == b"Ho");

    scheduler::force_current_task_for_test(None);
}

/// Contract: an oversized `iovcnt` is rejected before any fd or user memory
/// is even touched.
#[test_case]
fn test_sys_readv_rejects_oversized_iovcnt() {
    // iovcnt * 16 > ARGS_COPYBUF_SIZE(512) => 33 * 16 = 528.
    assert!(fs::sys_readv(999, 0, 33) == EINVAL);
    assert!(fs::sys_writev(999, 0, 33) == EINVAL);
}

/// Contract: `stat64`/`lstat64` report directory vs. file and the recorded
/// size/first-cluster, and `lstat64` behaves identically to `stat64`.
#[test_case]
fn test_stat64_and_lstat64_contract() {
    scheduler::force_current_task_for_test(Some(4));
    ensure_mounted();

    let path = user_path_buf("/GREET.TXT");
    let mut statbuf = [0u8; 12];
    assert!(fs::sys_stat64(path.as_ptr(), statbuf.as_mut_ptr()) == 0);
    assert!(statbuf[0] == 0, "GREET.TXT must not be reported as a directory");
    assert!(u32::from_le_bytes(statbuf[4..8].try_into().unwrap()) == 5);
    assert!(u32::from_le_bytes(statbuf[8..12].try_into().unwrap()) == 2);

    let dir_path = user_path_buf("/ADIR");
    let mut dir_statbuf = [0u8; 12];
    assert!(fs::sys_lstat64(dir_path.as_ptr(), dir_statbuf.as_mut_ptr()) == 0);
    assert!(dir_statbuf[0] == 1, "ADIR must be reported as a directory");

    let missing = user_path_buf("/nope.txt");
    assert!(fs::sys_stat64(missing.as_ptr(), statbuf.as_mut_ptr()) == ENOENT as i64);

    scheduler::force_current_task_for_test(None);
}

/// Contract: a relative path passed to `open` is resolved against the
/// process's current working directory, not always the root.
#[test_case]
fn test_sys_open_relative_path_uses_cwd() {
    scheduler::force_current_task_for_test(Some(5));
    ensure_mounted();
    with_process_fs(|state| state.set_cwd("/ADIR")).unwrap();

    let relative = user_path_buf("NOTE.TXT");
    let fd = fs::sys_open(relative.as_ptr(), 0, 0);
    assert!(fd >= 0, "a relative path must resolve against the process cwd");

    let mut buf = [0u8; 8];
    let n = fs::sys_read(fd as u64, buf.as_mut_ptr(), 8);
    assert!(n == 2);
    assert!(&buf[..2] == &b"Yo"[..]);

    with_process_fs(|state| state.set_cwd("/")).unwrap();
    scheduler::force_current_task_for_test(None);
}
