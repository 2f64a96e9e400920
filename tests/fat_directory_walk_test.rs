//! Directory walker, VFAT long-name reassembly, path resolver and
//! cluster-chain file reader integration tests, driven over one synthetic
//! FAT16 image.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;
use core::panic::PanicInfo;
use kaos_kernel::io::fat::path::{search_entry, FoundEntry, LookupError};
use kaos_kernel::io::fat::reader;
use kaos_kernel::io::fat::walker::{self, WalkControl};
use kaos_kernel::io::fat::FatImage;
use kaos_kernel::memory::{heap, pmm, vmm};

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
const ENTRY: usize = 32;

const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = walker::ATTR_DIRECTORY;
const ATTR_LONG_NAME: u8 = 0x0F;

fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn set_fat16_entry(buf: &mut [u8], fat_sector_start: usize, cluster: u32, value: u16) {
    write_u16(buf, fat_sector_start + cluster as usize * 2, value);
}

fn write_short_entry(
    buf: &mut [u8],
    off: usize,
    name11: &[u8; 11],
    attr: u8,
    first_cluster: u32,
    size: u32,
) {
    buf[off..off + 11].copy_from_slice(name11);
    buf[off + 11] = attr;
    buf[off + 12] = 0; // nt_res: no lower-case folding in this fixture
    write_u16(buf, off + 20, ((first_cluster >> 16) & 0xFFFF) as u16);
    write_u16(buf, off + 26, (first_cluster & 0xFFFF) as u16);
    write_u32(buf, off + 28, size);
}

fn vfat_checksum(name11: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in name11.iter() {
        sum = sum.rotate_right(1).wrapping_add(b);
    }
    sum
}

/// Writes a single VFAT long-name entry (covers names up to 13 ASCII characters).
fn write_lfn_entry(buf: &mut [u8], off: usize, checksum: u8, name: &str) {
    assert!(name.len() <= 13, "fixture helper only covers single-entry long names");

    let mut units = [0xFFFFu16; 13];
    for (i, c) in name.chars().enumerate() {
        units[i] = c as u16;
    }
    if name.len() < 13 {
        units[name.len()] = 0x0000;
    }

    buf[off] = 0x41; // ordinal 1, marked last-logical-entry
    buf[off + 11] = ATTR_LONG_NAME;
    buf[off + 12] = 0;
    buf[off + 13] = checksum;
    for i in 0..5 {
        write_u16(buf, off + 1 + i * 2, units[i]);
    }
    for i in 0..6 {
        write_u16(buf, off + 14 + i * 2, units[5 + i]);
    }
    for i in 0..2 {
        write_u16(buf, off + 28 + i * 2, units[11 + i]);
    }
}

fn write_bpb(buf: &mut [u8], total_sectors: u32) {
    write_u16(buf, 11, SECTOR as u16);
    buf[13] = 1; // sectors_per_cluster
    write_u16(buf, 14, 1); // reserved_sector_count
    buf[16] = 1; // num_fats
    write_u16(buf, 17, 16); // root_entry_count -> 1 root-dir sector
    write_u16(buf, 19, 0);
    write_u16(buf, 22, 1); // fat_size_16
    write_u32(buf, 32, total_sectors);
}

/// Builds the shared fixture image. Layout (sector index):
///   0: BPB
///   1: FAT
///   2: root directory (16 slots)
///   3: cluster 2 data  - "LongName.txt" content ("Hello\n")
///   4: cluster 3 data  - "HELLO.TXT" content ("Hello")
///   5: cluster 4 data  - SUBDIR's own directory block
///   6: cluster 5 data  - TWOCLUS.TXT part 1 (0xAA * 512)
///   7: cluster 6 data  - CHILD.TXT content ("Test")
///   8: cluster 7 data  - TWOCLUS.TXT part 2 (0xBB * 100, rest zero)
///   9: cluster 8 data  - BOUND.TXT content (0xCC * 512)
///  10: cluster 9 data  - init.txt content ("Hi\n")
fn build_fixture() -> &'static [u8] {
    let mut buf = alloc::vec![0u8; 11 * SECTOR];

    // data_sectors = 5003 - (1 + 1 + 1) = 5000 clusters: squarely FAT16.
    write_bpb(&mut buf, 5003);

    let fat_start = SECTOR;
    set_fat16_entry(&mut buf, fat_start, 2, 0xFFFF); // LongName.txt: EOC
    set_fat16_entry(&mut buf, fat_start, 3, 0xFFFF); // HELLO.TXT: EOC
    set_fat16_entry(&mut buf, fat_start, 4, 0xFFFF); // SUBDIR: EOC
    set_fat16_entry(&mut buf, fat_start, 5, 7); // TWOCLUS.TXT: cluster 5 -> 7
    set_fat16_entry(&mut buf, fat_start, 6, 0xFFFF); // CHILD.TXT: EOC
    set_fat16_entry(&mut buf, fat_start, 7, 0xFFFF); // TWOCLUS.TXT tail: EOC
    set_fat16_entry(&mut buf, fat_start, 8, 0xFFF7); // BOUND.TXT: deliberately "bad" past EOF
    set_fat16_entry(&mut buf, fat_start, 9, 0xFFFF); // init.txt: EOC

    let root_start = 2 * SECTOR;

    // Slot 0: deleted entry.
    buf[root_start] = 0xE5;

    // Slot 1: volume-label entry, must be skipped entirely.
    write_short_entry(&mut buf, root_start + ENTRY, b"VOLUME  LBL", ATTR_VOLUME_ID, 0, 0);

    // Slots 2-3: "LongName.txt" long-name group + short alias.
    let long_name_short: [u8; 11] = *b"LONGNA~1TXT";
    let checksum = vfat_checksum(&long_name_short);
    write_lfn_entry(&mut buf, root_start + 2 * ENTRY, checksum, "LongName.txt");
    write_short_entry(&mut buf, root_start + 3 * ENTRY, &long_name_short, ATTR_ARCHIVE, 2, 6);

    // Slot 4: plain short-named file.
    write_short_entry(&mut buf, root_start + 4 * ENTRY, b"HELLO   TXT", ATTR_ARCHIVE, 3, 5);

    // Slot 5: subdirectory.
    write_short_entry(&mut buf, root_start + 5 * ENTRY, b"SUBDIR     ", ATTR_DIRECTORY, 4, 0);

    // Slot 6: two-cluster file.
    write_short_entry(&mut buf, root_start + 6 * ENTRY, b"TWOCLUS TXT", ATTR_ARCHIVE, 5, 612);

    // Slot 7: exact-cluster-size boundary file.
    write_short_entry(&mut buf, root_start + 7 * ENTRY, b"BOUND   TXT", ATTR_ARCHIVE, 8, 512);

    // Slots 8-9: "init.txt" long-name group (8 chars, shorter than the
    // 13-code-unit entry capacity) + short alias. This exercises a long-name
    // entry whose unused tail slots are padded with 0xFFFF rather than
    // filled right up to the terminator, unlike "LongName.txt" above.
    let init_short: [u8; 11] = *b"INIT    TXT";
    let init_checksum = vfat_checksum(&init_short);
    write_lfn_entry(&mut buf, root_start + 8 * ENTRY, init_checksum, "init.txt");
    write_short_entry(&mut buf, root_start + 9 * ENTRY, &init_short, ATTR_ARCHIVE, 9, 3);

    // Slot 10 left zeroed: 0x00 end-of-directory sentinel.

    // Subdirectory contents (cluster 4, sector 5).
    let subdir_start = 5 * SECTOR;
    write_short_entry(&mut buf, subdir_start, b"CHILD   TXT", ATTR_ARCHIVE, 6, 4);
    // remaining bytes already zero: end-of-directory sentinel.

    // File contents.
    buf[3 * SECTOR..3 * SECTOR + 6].copy_from_slice(b"Hello\n");
    buf[4 * SECTOR..4 * SECTOR + 5].copy_from_slice(b"Hello");
    buf[7 * SECTOR..7 * SECTOR + 4].copy_from_slice(b"Test");
    for b in &mut buf[6 * SECTOR..6 * SECTOR + SECTOR] {
        *b = 0xAA;
    }
    for b in &mut buf[8 * SECTOR..8 * SECTOR + 100] {
        *b = 0xBB;
    }
    for b in &mut buf[9 * SECTOR..9 * SECTOR + SECTOR] {
        *b = 0xCC;
    }
    buf[10 * SECTOR..10 * SECTOR + 3].copy_from_slice(b"Hi\n");

    buf.leak()
}

fn mounted() -> FatImage {
    FatImage::from_slice(build_fixture()).expect("fixture image must mount as FAT16")
}

/// Contract: the walker skips deleted and volume-label slots, and binds the
/// VFAT long name to its short entry only when the checksum matches.
#[test_case]
fn test_walker_reassembles_long_name_and_skips_reserved_slots() {
    let image = mounted();
    let mut seen: Vec<(alloc::string::String, Option<alloc::string::String>)> = Vec::new();

    walker::walk(&image, image.root_dir(), |entry, long_name| {
        seen.push((entry.short_name(), long_name.map(alloc::string::String::from)));
        WalkControl::Continue
    });

    assert!(seen.len() == 6, "walker must emit exactly the 6 non-reserved short entries");

    let long_name_entry = seen.iter().find(|(short, _)| short == "LONGNA~1.TXT").unwrap();
    assert!(
        long_name_entry.1.as_deref() == Some("LongName.txt"),
        "checksum-matched long name must be handed to the callback"
    );

    let hello_entry = seen.iter().find(|(short, _)| short == "HELLO.TXT").unwrap();
    assert!(hello_entry.1.is_none(), "a short entry with no preceding LFN group must get no long name");

    let init_entry = seen.iter().find(|(short, _)| short == "INIT.TXT").unwrap();
    assert!(
        init_entry.1.as_deref() == Some("init.txt"),
        "a long name shorter than 13 chars must reassemble correctly despite its 0xFFFF-padded tail slots"
    );
}

/// Contract: `search_entry("/")` resolves synthetically without consulting the disk.
#[test_case]
fn test_search_entry_root() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/"), Ok(FoundEntry::Root)));
}

/// Contract: a long name matches only case-sensitively.
#[test_case]
fn test_search_entry_long_name_is_case_sensitive() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/LongName.txt"), Ok(FoundEntry::Entry(_))));
    assert!(
        matches!(search_entry(&image, "/longname.txt"), Err(LookupError::NotFound)),
        "a differently-cased long name must not match (this design's deliberate case rule)"
    );
}

/// Contract: a long name shorter than the 13-code-unit entry capacity (whose
/// unused tail slots are 0xFFFF-padded rather than terminator-filled) must
/// still resolve and match case-sensitively like any other long name.
#[test_case]
fn test_search_entry_short_long_name_with_padded_tail() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/init.txt"), Ok(FoundEntry::Entry(_))));
    assert!(
        matches!(search_entry(&image, "/INIT.TXT"), Err(LookupError::NotFound)),
        "a differently-cased long name must not match"
    );
}

/// Contract: a short name matches case-insensitively.
#[test_case]
fn test_search_entry_short_name_is_case_insensitive() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/hello.txt"), Ok(FoundEntry::Entry(_))));
    assert!(matches!(search_entry(&image, "/HELLO.TXT"), Ok(FoundEntry::Entry(_))));
}

/// Contract: the resolver walks into subdirectories across a pending cluster chain.
#[test_case]
fn test_search_entry_nested_path() {
    let image = mounted();
    let found = search_entry(&image, "/SUBDIR/CHILD.TXT").expect("nested file must resolve");
    match found {
        FoundEntry::Entry(entry) => {
            assert!(entry.file_size() == 4, "resolved entry must be the child file, not the directory");
        }
        FoundEntry::Root => panic!("nested lookup must not resolve to root"),
    }
}

/// Contract: descending through a non-directory component is ENOTDIR, not ENOENT.
#[test_case]
fn test_search_entry_non_directory_component() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/HELLO.TXT/x"), Err(LookupError::NotADirectory)));
}

/// Contract: an absent component is ENOENT.
#[test_case]
fn test_search_entry_missing_component() {
    let image = mounted();
    assert!(matches!(search_entry(&image, "/nope"), Err(LookupError::NotFound)));
    assert!(matches!(search_entry(&image, "/SUBDIR/nope"), Err(LookupError::NotFound)));
}

/// Contract: whole-file reads reproduce exactly the on-disk bytes.
#[test_case]
fn test_read_whole_single_cluster() {
    let image = mounted();
    let found = search_entry(&image, "/LongName.txt").unwrap();
    let entry = match found {
        FoundEntry::Entry(e) => e,
        FoundEntry::Root => unreachable!(),
    };

    let mut dest = [0u8; 6];
    let n = reader::read_whole(&image, &entry, &mut dest);
    assert!(n == 6);
    assert!(&dest == b"Hello\n");
}

/// Contract: a multi-cluster file reader follows the FAT chain and
/// concatenates cluster contents in order.
#[test_case]
fn test_read_whole_multi_cluster_chain() {
    let image = mounted();
    let found = search_entry(&image, "/TWOCLUS.TXT").unwrap();
    let entry = match found {
        FoundEntry::Entry(e) => e,
        FoundEntry::Root => unreachable!(),
    };

    let mut dest = [0u8; 612];
    let n = reader::read_whole(&image, &entry, &mut dest);
    assert!(n == 612);
    assert!(dest[..512].iter().all(|&b| b == 0xAA), "first cluster must come from cluster 5");
    assert!(dest[512..612].iter().all(|&b| b == 0xBB), "tail bytes must come from the chained cluster 7");
}

/// Contract: a file whose size is an exact multiple of the cluster size must
/// not dereference the next FAT entry, even when that entry is a bad marker.
#[test_case]
fn test_read_whole_exact_cluster_boundary_does_not_overrun() {
    let image = mounted();
    let found = search_entry(&image, "/BOUND.TXT").unwrap();
    let entry = match found {
        FoundEntry::Entry(e) => e,
        FoundEntry::Root => unreachable!(),
    };

    let mut dest = [0u8; 512];
    // Cluster 8's FAT entry is a bad-cluster marker; if the reader looked
    // ahead after completing exactly `file_size` bytes, this would panic.
    let n = reader::read_whole(&image, &entry, &mut dest);
    assert!(n == 512);
    assert!(dest.iter().all(|&b| b == 0xCC));
}

/// Contract: `read_at` supports an arbitrary starting offset within a file.
#[test_case]
fn test_read_at_partial_offset() {
    let image = mounted();
    let found = search_entry(&image, "/TWOCLUS.TXT").unwrap();
    let entry = match found {
        FoundEntry::Entry(e) => e,
        FoundEntry::Root => unreachable!(),
    };

    let mut dest = [0u8; 20];
    let n = reader::read_at(&image, &entry, 500, &mut dest);
    assert!(n == 20, "read must be fully satisfied from within the available range");
    assert!(dest[..12].iter().all(|&b| b == 0xAA), "first 12 bytes still belong to cluster 5");
    assert!(dest[12..].iter().all(|&b| b == 0xBB), "remaining bytes come from the chained cluster");
}
