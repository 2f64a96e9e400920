//! Short (8.3) name extraction/formatting and the FAT short-name charset.

use alloc::string::String;

/// Attribute bit marking a directory entry's base name as lower-case.
pub const NT_RES_LOWER_BASE: u8 = 0x08;
/// Attribute bit marking a directory entry's extension as lower-case.
pub const NT_RES_LOWER_EXT: u8 = 0x10;

/// 256-entry bitmap of characters legal in a FAT short name.
///
/// Authoritative per this design: the printable ASCII subset minus
/// `!"*/:<>?\|`, all control characters, and the space character (space is
/// the short-name padding byte, never a name character).
const fn build_charset() -> [bool; 256] {
    let mut table = [false; 256];
    let mut c = 0x20usize;
    while c < 0x7F {
        table[c] = true;
        c += 1;
    }
    let forbidden: &[u8] = b"!\"*/:<>?\\| ";
    let mut i = 0;
    while i < forbidden.len() {
        table[forbidden[i] as usize] = false;
        i += 1;
    }
    table
}

const SHORT_NAME_CHARSET: [bool; 256] = build_charset();

/// Whether `byte` is legal in a FAT short name (the ASCII subset this design
/// treats as authoritative).
pub fn is_valid_short_name_char(byte: u8) -> bool {
    SHORT_NAME_CHARSET[byte as usize]
}

/// Extracts the base + extension short name from the on-disk 11-byte field,
/// applying per-field lower-case folding according to `nt_res`.
///
/// Matches the 8.3 formation rule: base bytes up to the first space, then
/// (if any extension byte is non-space) a `.` plus extension bytes up to the
/// first space.
pub fn extract_short_name(raw: &[u8; 11], nt_res: u8) -> String {
    let mut name = String::with_capacity(12);

    let base_end = raw[0..8].iter().position(|&b| b == b' ').unwrap_or(8);
    let lower_base = nt_res & NT_RES_LOWER_BASE != 0;
    for &b in &raw[0..base_end] {
        name.push(fold(b, lower_base) as char);
    }

    let ext_end = raw[8..11].iter().position(|&b| b == b' ').unwrap_or(3);
    if ext_end > 0 {
        name.push('.');
        let lower_ext = nt_res & NT_RES_LOWER_EXT != 0;
        for &b in &raw[8..8 + ext_end] {
            name.push(fold(b, lower_ext) as char);
        }
    }

    name
}

fn fold(b: u8, lower: bool) -> u8 {
    if lower {
        b.to_ascii_lowercase()
    } else {
        b
    }
}

/// Computes the VFAT checksum of an 11-byte on-disk short name: a 1-byte
/// rotate-right sum, used to bind long-name entries to their short entry.
pub fn checksum(raw: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in raw.iter() {
        sum = sum.rotate_right(1).wrapping_add(b);
    }
    sum
}
