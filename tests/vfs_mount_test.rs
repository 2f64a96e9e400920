//! Mountpoint registry, `Handle` locking, and the FAT `Filesystem`/`FsHandle`
//! adapter.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use core::panic::PanicInfo;
use kaos_kernel::io::fat::FatImage;
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::vfs::fatfs::FatFilesystem;
use kaos_kernel::vfs::mount::{self, mount_root};
use kaos_kernel::vfs::{exvfs_open, Filesystem, FsHandle, Handle, Stat, VfsError};

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

fn write_short_entry(buf: &mut [u8], off: usize, name11: &[u8; 11], attr: u8, first_cluster: u32, size: u32) {
    buf[off..off + 11].copy_from_slice(name11);
    buf[off + 11] = attr;
    write_u16(buf, off + 20, ((first_cluster >> 16) & 0xFFFF) as u16);
    write_u16(buf, off + 26, (first_cluster & 0xFFFF) as u16);
    write_u32(buf, off + 28, size);
}

/// One-file FAT16 fixture: root dir has a single "GREET.TXT" entry (cluster 2).
fn build_fixture() -> &'static [u8] {
    let mut buf = alloc::vec![0u8; 4 * SECTOR];

    write_u16(&mut buf, 11, SECTOR as u16);
    buf[13] = 1; // sectors_per_cluster
    write_u16(&mut buf, 14, 1); // reserved_sector_count
    buf[16] = 1; // num_fats
    write_u16(&mut buf, 17, 16); // root_entry_count
    write_u16(&mut buf, 22, 1); // fat_size_16
    write_u32(&mut buf, 32, 5003); // total_sectors -> 5000 clusters, squarely FAT16

    let fat_start = SECTOR;
    write_u16(&mut buf, fat_start + 2 * 2, 0xFFFF); // cluster 2: EOC

    let root_start = 2 * SECTOR;
    write_short_entry(&mut buf, root_start, b"GREET   TXT", 0x20, 2, 5);

    buf[3 * SECTOR..3 * SECTOR + 5].copy_from_slice(b"Howdy");

    buf.leak()
}

fn mounted_fs() -> FatFilesystem {
    let image = FatImage::from_slice(build_fixture()).expect("fixture must mount as FAT16");
    FatFilesystem::new(image)
}

struct StubHandle(u32);

impl FsHandle for StubHandle {
    fn read_at(&self, _offset: usize, buf: &mut [u8]) -> Result<usize, VfsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.0 as u8;
        Ok(1)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, VfsError> {
        Ok(0)
    }

    fn ioctl(&self, _request: u32, _argp: usize) -> Result<usize, VfsError> {
        Ok(0)
    }

    fn stat(&self) -> Stat {
        Stat { is_directory: false, size: 0, first_cluster: self.0 }
    }
}

struct StubFs(u32);

impl Filesystem for StubFs {
    fn open(&self, _path: &str) -> Result<Box<dyn FsHandle>, VfsError> {
        Ok(Box::new(StubHandle(self.0)))
    }
}

/// Contract: the mount table resolves a path against the *longest* matching
/// registered prefix, not simply the first one that matches.
#[test_case]
fn test_get_mount_picks_longest_prefix() {
    let shallow: &'static StubFs = Box::leak(Box::new(StubFs(1)));
    let deep: &'static StubFs = Box::leak(Box::new(StubFs(2)));
    mount::mountpoint_add("/zzqa", shallow);
    mount::mountpoint_add("/zzqa/deep", deep);

    let fs = mount::get_mount("/zzqa/deep/file.txt").expect("a prefix must match");
    let handle = fs.open("/zzqa/deep/file.txt").unwrap();
    assert!(handle.stat().first_cluster == 2, "the more specific /zzqa/deep mount must win");

    let fs = mount::get_mount("/zzqa/other.txt").expect("the shallow prefix must still match");
    let handle = fs.open("/zzqa/other.txt").unwrap();
    assert!(handle.stat().first_cluster == 1, "a path under only the shallow prefix must resolve there");
}

/// Contract: a path matching no registered prefix resolves to no filesystem.
#[test_case]
fn test_get_mount_returns_none_for_unmounted_path() {
    assert!(mount::get_mount("zzqb-relative-path-never-mounted").is_none());
}

/// Contract: `Handle` serializes readers against writers but allows
/// concurrent-looking repeated shared access (verified here by simply
/// acquiring and dropping each guard kind in sequence, since this kernel is
/// single-core-at-a-time from a test's point of view).
#[test_case]
fn test_handle_shared_and_exclusive_guards() {
    let handle = Handle::new(Box::new(StubHandle(7)));

    {
        let guard = handle.shared();
        let mut buf = [0u8; 1];
        assert!(guard.read_at(0, &mut buf).unwrap() == 1);
        assert!(buf[0] == 7);
    }
    {
        let guard = handle.exclusive();
        assert!(guard.write(b"x").unwrap() == 0);
    }

    assert!(handle.offset() == 0);
    handle.advance(5);
    assert!(handle.offset() == 5);
    handle.advance(3);
    assert!(handle.offset() == 8);
}

/// Contract: `FatFilesystem::open` resolves a real on-disk entry and exposes
/// file content through `read_at`, with directories reading as empty and
/// every mutation rejected as read-only.
#[test_case]
fn test_fat_filesystem_open_read_and_stat() {
    let fs = mounted_fs();

    let handle = fs.open("/GREET.TXT").expect("fixture file must resolve");
    let stat = handle.stat();
    assert!(!stat.is_directory);
    assert!(stat.size == 5);

    let mut buf = [0u8; 5];
    let n = handle.read_at(0, &mut buf).unwrap();
    assert!(n == 5);
    assert!(&buf == b"Howdy");

    assert!(matches!(handle.write(b"no"), Err(VfsError::ReadOnly)));
    assert!(matches!(handle.ioctl(0, 0), Err(VfsError::ReadOnly)));
}

/// Contract: opening the synthetic root directory stats as a directory and
/// reads as zero bytes.
#[test_case]
fn test_fat_filesystem_open_root() {
    let fs = mounted_fs();
    let handle = fs.open("/").expect("root must always resolve");
    let stat = handle.stat();
    assert!(stat.is_directory);

    let mut buf = [0u8; 4];
    assert!(handle.read_at(0, &mut buf).unwrap() == 0);
}

/// Contract: a missing path surfaces as `VfsError::NotFound` through the
/// `Filesystem` trait, not a panic.
#[test_case]
fn test_fat_filesystem_open_missing_file() {
    let fs = mounted_fs();
    assert!(matches!(fs.open("/nope.txt"), Err(VfsError::NotFound)));
}

/// Contract: `mount_root` registers the image at `/` and `exvfs_open` then
/// resolves real paths through the full mount-table dispatch.
#[test_case]
fn test_mount_root_and_exvfs_open() {
    let image = build_fixture();
    unsafe {
        mount_root(image.as_ptr(), image.len()).expect("fixture image must mount");
    }

    let handle = exvfs_open("/GREET.TXT").expect("exvfs_open must dispatch through the mounted root");
    let mut buf = [0u8; 5];
    let n = handle.shared().read_at(0, &mut buf).unwrap();
    assert!(n == 5);
    assert!(&buf == b"Howdy");
}
