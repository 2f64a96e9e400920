//! Sequential cluster-chain file reading.

use super::FatImage;
use super::walker::ShortEntry;

/// Copies the entire contents of `entry` into `dest`.
///
/// Requires `entry.file_size() <= dest.len()`; returns the number of bytes
/// written (always `entry.file_size()` on success).
///
/// # Panics
/// Panics if the cluster chain reaches an end-of-chain or bad-cluster marker
/// before `file_size` bytes have been produced — per this design, a
/// directory entry's chain disagreeing with its own recorded size is a
/// program-invariant violation (a malformed image), not a recoverable error.
pub fn read_whole(image: &FatImage, entry: &ShortEntry, dest: &mut [u8]) -> usize {
    read_at(image, entry, 0, dest)
}

/// Copies up to `dest.len()` bytes of `entry`'s content starting at byte
/// `offset`, returning the number of bytes actually copied (clamped to
/// `entry.file_size() - offset`, or 0 if `offset >= file_size`).
///
/// Walks whole clusters until `offset` falls inside the current cluster,
/// then copies forward exactly as [`read_whole`] does, including the same
/// panic discipline on a premature EOC/bad cluster.
pub fn read_at(image: &FatImage, entry: &ShortEntry, offset: usize, dest: &mut [u8]) -> usize {
    let file_size = entry.file_size() as usize;
    assert!(file_size <= usize::MAX, "file_size must fit in usize");

    if offset >= file_size {
        return 0;
    }

    let want = core::cmp::min(dest.len(), file_size - offset);
    if want == 0 {
        return 0;
    }

    let cluster_size = image.cluster_size();
    let mut cluster = entry.first_cluster();
    let mut clusters_to_skip = offset / cluster_size;
    let mut intra_cluster_offset = offset % cluster_size;

    while clusters_to_skip > 0 {
        let next = image.read_fat_entry(cluster, 0);
        if image.is_eoc(next) {
            panic!("cluster chain ended before reaching the requested offset: malformed FAT image");
        }
        if image.is_bad(next) {
            panic!("cluster chain references a bad cluster: malformed FAT image");
        }
        cluster = next;
        clusters_to_skip -= 1;
    }

    let mut written = 0usize;
    loop {
        let cluster_offset = image.cluster_offset(cluster);
        let cluster_bytes = &image.bytes()[cluster_offset..cluster_offset + cluster_size];

        let available_in_cluster = cluster_size - intra_cluster_offset;
        let remaining_wanted = want - written;
        let copy_len = core::cmp::min(available_in_cluster, remaining_wanted);

        dest[written..written + copy_len]
            .copy_from_slice(&cluster_bytes[intra_cluster_offset..intra_cluster_offset + copy_len]);
        written += copy_len;
        intra_cluster_offset = 0;

        if written == want {
            return written;
        }

        let next = image.read_fat_entry(cluster, 0);
        if image.is_eoc(next) {
            panic!("cluster chain ended before file_size bytes were read: malformed FAT image");
        }
        if image.is_bad(next) {
            panic!("cluster chain references a bad cluster: malformed FAT image");
        }
        cluster = next;
    }
}
