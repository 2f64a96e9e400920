//! `Filesystem`/`FsHandle` adapter over the read-only FAT16/32 engine.
//!
//! This is the one concrete filesystem this kernel mounts. It owns a
//! [`FatImage`] by value (cheap: a `&'static` slice plus a decoded header)
//! and turns [`path::search_entry`] lookups into opaque [`FsHandle`] objects.

use alloc::boxed::Box;

use crate::io::fat::path::{self, FoundEntry, LookupError};
use crate::io::fat::reader;
use crate::io::fat::walker::ShortEntry;
use crate::io::fat::{FatImage, RootDir};

use super::{Filesystem, FsHandle, Stat, VfsError};

impl From<LookupError> for VfsError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound => VfsError::NotFound,
            LookupError::NotADirectory => VfsError::NotADirectory,
        }
    }
}

/// A mounted FAT16/32 image, registered in the mountpoint table.
#[derive(Clone, Copy)]
pub struct FatFilesystem {
    image: FatImage,
}

impl FatFilesystem {
    pub fn new(image: FatImage) -> Self {
        FatFilesystem { image }
    }
}

impl Filesystem for FatFilesystem {
    fn open(&self, path: &str) -> Result<Box<dyn FsHandle>, VfsError> {
        let found = path::search_entry(&self.image, path)?;
        let entry = match found {
            FoundEntry::Root => StoredEntry::Root,
            FoundEntry::Entry(entry) => StoredEntry::Entry(entry),
        };
        Ok(Box::new(FatHandle { image: self.image, entry }))
    }
}

/// What a [`FatHandle`] was opened against: the synthetic root, or a real
/// on-disk short entry.
#[derive(Clone, Copy)]
enum StoredEntry {
    Root,
    Entry(ShortEntry),
}

/// An open file or directory on the mounted FAT image.
struct FatHandle {
    image: FatImage,
    entry: StoredEntry,
}

impl FsHandle for FatHandle {
    /// Directories have no byte content in this design; reading one returns
    /// 0 bytes rather than an error, matching a read-only directory `fd`.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, VfsError> {
        match &self.entry {
            StoredEntry::Root => Ok(0),
            StoredEntry::Entry(entry) => {
                if entry.is_directory() {
                    return Ok(0);
                }
                Ok(reader::read_at(&self.image, entry, offset, buf))
            }
        }
    }

    /// The mounted image is read-only: every write fails unconditionally.
    fn write(&self, _buf: &[u8]) -> Result<usize, VfsError> {
        Err(VfsError::ReadOnly)
    }

    fn ioctl(&self, _request: u32, _argp: usize) -> Result<usize, VfsError> {
        Err(VfsError::ReadOnly)
    }

    fn stat(&self) -> Stat {
        match &self.entry {
            StoredEntry::Root => Stat {
                is_directory: true,
                size: 0,
                first_cluster: match self.image.root_dir() {
                    RootDir::Chain(cluster) => cluster,
                    RootDir::Fixed(_, _) => 0,
                },
            },
            StoredEntry::Entry(entry) => Stat {
                is_directory: entry.is_directory(),
                size: entry.file_size(),
                first_cluster: entry.first_cluster(),
            },
        }
    }
}
