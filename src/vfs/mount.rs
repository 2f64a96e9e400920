//! Mountpoint registry: an ordered `(prefix, filesystem)` table, looked up by
//! longest matching prefix, plus the boot-time entry point that mounts the
//! kernel's FAT16/32 ramdisk at `/`.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::io::fat::{FatError, FatImage};
use crate::sync::spinlock::SpinLock;
use crate::debugln;

use super::fatfs::FatFilesystem;
use super::Filesystem;

struct MountTable {
    entries: Vec<(String, &'static dyn Filesystem)>,
}

impl MountTable {
    const fn new() -> Self {
        MountTable { entries: Vec::new() }
    }
}

static MOUNTS: SpinLock<MountTable> = SpinLock::new(MountTable::new());

/// Registers `fs` to serve every path starting with `prefix`.
pub fn mountpoint_add(prefix: &str, fs: &'static dyn Filesystem) {
    let mut table = MOUNTS.lock();
    table.entries.push((String::from(prefix), fs));
}

/// Finds the filesystem owning `path` by longest matching mounted prefix.
pub fn get_mount(path: &str) -> Option<&'static dyn Filesystem> {
    let table = MOUNTS.lock();
    table
        .entries
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, fs)| *fs)
}

/// Mounts the FAT16/32 ramdisk image at `/`.
///
/// This is the kernel's single boot-time entry point into the VFS layer;
/// locating the ramdisk region itself (`ptr`/`len`) is left to whatever boot
/// stage hands memory off to the kernel, not this function's concern.
///
/// # Safety
/// Same contract as [`FatImage::mount`]: `ptr` must point to `len` readable
/// bytes that stay valid and unmodified for the kernel's remaining lifetime.
pub unsafe fn mount_root(ptr: *const u8, len: usize) -> Result<(), FatError> {
    // SAFETY: forwarded verbatim from this function's own contract.
    let image = unsafe { FatImage::mount(ptr, len) }?;
    let fs: &'static FatFilesystem = Box::leak(Box::new(FatFilesystem::new(image)));
    mountpoint_add("/", fs);
    debugln!("vfs: mounted {:?} ramdisk at /", image.fat_type());
    Ok(())
}
