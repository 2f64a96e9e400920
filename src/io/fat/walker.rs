//! Directory walker: iterates the short entries of one directory, accumulating
//! and validating VFAT long-name groups along the way.

use alloc::string::String;

use super::shortname::{self, checksum};
use super::{DIR_ENTRY_SIZE, FatImage, RootDir};

const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

const LFN_ORD_OFFSET: usize = 0;
const LFN_CHECKSUM_OFFSET: usize = 13;
const LFN_NAME1_OFFSET: usize = 1; // 5 UTF-16 code units
const LFN_NAME2_OFFSET: usize = 14; // 6 UTF-16 code units
const LFN_NAME3_OFFSET: usize = 28; // 2 UTF-16 code units

const SHORT_NAME_OFFSET: usize = 0;
const ATTR_OFFSET: usize = 11;
const NT_RES_OFFSET: usize = 12;
const FIRST_CLUSTER_HI_OFFSET: usize = 20;
const FIRST_CLUSTER_LO_OFFSET: usize = 26;
const FILE_SIZE_OFFSET: usize = 28;

/// One decoded short directory entry (32 bytes).
#[derive(Debug, Clone, Copy)]
pub struct ShortEntry {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl ShortEntry {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..DIR_ENTRY_SIZE]);
        ShortEntry { raw }
    }

    /// Builds a `ShortEntry` from raw on-disk bytes (used by tests and by
    /// the VFS layer when reconstructing an entry from a stored directory
    /// location).
    pub fn from_raw(raw: [u8; DIR_ENTRY_SIZE]) -> Self {
        ShortEntry { raw }
    }

    pub fn short_name_raw(&self) -> [u8; 11] {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.raw[SHORT_NAME_OFFSET..SHORT_NAME_OFFSET + 11]);
        name
    }

    pub fn nt_res(&self) -> u8 {
        self.raw[NT_RES_OFFSET]
    }

    pub fn attributes(&self) -> u8 {
        self.raw[ATTR_OFFSET]
    }

    pub fn is_directory(&self) -> bool {
        self.attributes() & ATTR_DIRECTORY != 0
    }

    pub fn first_cluster(&self) -> u32 {
        let hi = u16::from_le_bytes([
            self.raw[FIRST_CLUSTER_HI_OFFSET],
            self.raw[FIRST_CLUSTER_HI_OFFSET + 1],
        ]) as u32;
        let lo = u16::from_le_bytes([
            self.raw[FIRST_CLUSTER_LO_OFFSET],
            self.raw[FIRST_CLUSTER_LO_OFFSET + 1],
        ]) as u32;
        (hi << 16) | lo
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le_bytes([
            self.raw[FILE_SIZE_OFFSET],
            self.raw[FILE_SIZE_OFFSET + 1],
            self.raw[FILE_SIZE_OFFSET + 2],
            self.raw[FILE_SIZE_OFFSET + 3],
        ])
    }

    pub fn short_name(&self) -> String {
        shortname::extract_short_name(&self.short_name_raw(), self.nt_res())
    }

    fn short_name_checksum(&self) -> u8 {
        checksum(&self.short_name_raw())
    }
}

/// What the walker's callback asks it to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

/// Accumulator for in-progress VFAT long-name reassembly.
///
/// Long-name entries precede their short entry in reverse sequence order, so
/// this buffer fills back-to-front and is reversed once the group closes.
struct LongNameAccumulator {
    chars: alloc::vec::Vec<u16>,
    checksum: Option<u8>,
    valid: bool,
}

impl LongNameAccumulator {
    fn new() -> Self {
        LongNameAccumulator { chars: alloc::vec::Vec::new(), checksum: None, valid: true }
    }

    fn reset(&mut self) {
        self.chars.clear();
        self.checksum = None;
        self.valid = true;
    }

    fn push_entry(&mut self, raw: &[u8; DIR_ENTRY_SIZE]) {
        let entry_checksum = raw[LFN_CHECKSUM_OFFSET];

        // Entries arrive in reverse order; a checksum change starts a fresh
        // group (the previous, incomplete group is simply discarded).
        if self.checksum != Some(entry_checksum) {
            self.reset();
            self.checksum = Some(entry_checksum);
        }

        let mut units: alloc::vec::Vec<u16> = alloc::vec::Vec::with_capacity(13);
        for &(off, count) in &[(LFN_NAME1_OFFSET, 5), (LFN_NAME2_OFFSET, 6), (LFN_NAME3_OFFSET, 2)] {
            for i in 0..count {
                let byte_off = off + i * 2;
                let lo = raw[byte_off];
                let hi = raw[byte_off + 1];
                units.push(u16::from_le_bytes([lo, hi]));
            }
        }

        // The terminator (0x0000) and any trailing 0xFFFF padding past it are
        // not name characters, so the non-ASCII check below must only apply
        // to code units before the terminator.
        let mut this_entry_chars: alloc::vec::Vec<u16> = alloc::vec::Vec::with_capacity(13);
        for u in units {
            if u == 0x0000 || u == 0xFFFF {
                break;
            }
            if u > 0xFF || !shortname::is_valid_short_name_char(u as u8) {
                // Non-ASCII UTF-16 code unit: outside this design's supported subset.
                self.valid = false;
            }
            this_entry_chars.push(u);
        }

        // Entries arrive in reverse order and `take()` reverses the whole
        // accumulator once at the end, so each entry's own characters must be
        // pushed back-to-front too: a flat reverse of [block_hi, ..., block_lo]
        // only lands on the correct forward string if every block was itself
        // reversed going in.
        this_entry_chars.reverse();
        self.chars.extend_from_slice(&this_entry_chars);
    }

    /// Finalizes the group against the following short entry's checksum.
    /// Returns `None` if the group never closed with a matching checksum.
    fn take(&mut self, short_checksum: u8) -> Option<String> {
        let matched = self.valid && self.checksum == Some(short_checksum) && !self.chars.is_empty();
        let result = if matched {
            // Reverse in place: long-entry order was highest-ordinal first
            // (i.e. reverse sequence order), so the accumulated buffer is
            // backwards and must be flipped before handing it to the caller.
            self.chars.reverse();
            let s: String = self
                .chars
                .iter()
                .filter_map(|&u| char::from_u32(u as u32))
                .collect();
            Some(s)
        } else {
            None
        };
        self.reset();
        result
    }
}

/// Iterates every non-reserved short entry of the directory starting at
/// `root`, invoking `callback(entry, long_name)` for each one.
///
/// Termination: the callback returning [`WalkControl::Stop`], reaching the
/// 0x00 end-of-directory sentinel, or running off a non-chained (FAT16)
/// root directory.
pub fn walk<F>(image: &FatImage, root: RootDir, mut callback: F)
where
    F: FnMut(&ShortEntry, Option<&str>) -> WalkControl,
{
    let mut acc = LongNameAccumulator::new();

    match root {
        RootDir::Fixed(start, end) => {
            walk_fixed_range(image, start, end, &mut acc, &mut callback);
        }
        RootDir::Chain(cluster) => {
            walk_chain(image, cluster, &mut acc, &mut callback);
        }
    }
}

fn walk_fixed_range<F>(
    image: &FatImage,
    start: usize,
    end: usize,
    acc: &mut LongNameAccumulator,
    callback: &mut F,
) where
    F: FnMut(&ShortEntry, Option<&str>) -> WalkControl,
{
    let bytes = &image.bytes()[start..end];
    for chunk in bytes.chunks_exact(DIR_ENTRY_SIZE) {
        if walk_one_entry(chunk, acc, callback) == EntryOutcome::Stop {
            return;
        }
    }
}

fn walk_chain<F>(image: &FatImage, first_cluster: u32, acc: &mut LongNameAccumulator, callback: &mut F)
where
    F: FnMut(&ShortEntry, Option<&str>) -> WalkControl,
{
    let mut cluster = first_cluster;
    loop {
        let offset = image.cluster_offset(cluster);
        let size = image.cluster_size();
        let bytes = &image.bytes()[offset..offset + size];

        for chunk in bytes.chunks_exact(DIR_ENTRY_SIZE) {
            match walk_one_entry(chunk, acc, callback) {
                EntryOutcome::Stop => return,
                EntryOutcome::Continue => {}
            }
        }

        let next = image.read_fat_entry(cluster, 0);
        if image.is_eoc(next) {
            return;
        }
        if image.is_bad(next) {
            panic!("directory cluster chain references a bad cluster: malformed FAT image");
        }
        cluster = next;
    }
}

#[derive(PartialEq, Eq)]
enum EntryOutcome {
    Continue,
    Stop,
}

fn walk_one_entry<F>(chunk: &[u8], acc: &mut LongNameAccumulator, callback: &mut F) -> EntryOutcome
where
    F: FnMut(&ShortEntry, Option<&str>) -> WalkControl,
{
    let first_byte = chunk[0];

    // 0x00: no more entries in this directory table.
    if first_byte == 0x00 {
        return EntryOutcome::Stop;
    }

    // 0xE5: deleted/empty slot.
    if first_byte == 0xE5 {
        return EntryOutcome::Continue;
    }

    let attributes = chunk[ATTR_OFFSET];

    if attributes & ATTR_VOLUME_ID != 0 && attributes != ATTR_LONG_NAME {
        return EntryOutcome::Continue;
    }

    if attributes == ATTR_LONG_NAME {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(chunk);
        acc.push_entry(&raw);
        return EntryOutcome::Continue;
    }

    let entry = ShortEntry::from_slice(chunk);
    let long_name = acc.take(entry.short_name_checksum());

    let control = callback(&entry, long_name.as_deref());
    match control {
        WalkControl::Stop => EntryOutcome::Stop,
        WalkControl::Continue => EntryOutcome::Continue,
    }
}
