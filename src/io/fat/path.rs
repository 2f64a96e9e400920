//! Path resolver: tokenizes an absolute path and drives the directory walker
//! across subdirectories, applying this design's case-matching rule.

use alloc::string::String;

use super::walker::{self, ShortEntry, WalkControl};
use super::{FatImage, RootDir};

/// Failure modes of [`search_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    NotADirectory,
}

/// Resolves an absolute path to its directory entry.
///
/// `"/"` resolves synthetically to the root directory (no on-disk entry
/// backs it). Matching rule: a component compares **case-sensitively**
/// against a long name when the walker supplied one, and **case-insensitively**
/// against the extracted short name otherwise — a deliberate deviation from
/// the FAT spec that lets callers depend on case by giving a file a long
/// name whenever case distinction matters.
pub fn search_entry(image: &FatImage, abspath: &str) -> Result<FoundEntry, LookupError> {
    if !abspath.starts_with('/') {
        return Err(LookupError::NotFound);
    }

    if abspath == "/" {
        return Ok(FoundEntry::Root);
    }

    let mut components = abspath.split('/').filter(|c| !c.is_empty()).peekable();
    let mut current_root = image.root_dir();

    loop {
        let component = match components.next() {
            Some(c) => c,
            None => return Err(LookupError::NotFound),
        };
        let is_last = components.peek().is_none();

        let found = find_in_directory(image, current_root, component);

        match found {
            None => return Err(LookupError::NotFound),
            Some(entry) => {
                if is_last {
                    return Ok(FoundEntry::Entry(entry));
                }
                if !entry.is_directory() {
                    return Err(LookupError::NotADirectory);
                }
                current_root = RootDir::Chain(entry.first_cluster());
            }
        }
    }
}

/// What `search_entry` resolved to.
pub enum FoundEntry {
    /// The synthetic root directory (no backing on-disk short entry).
    Root,
    Entry(ShortEntry),
}

fn find_in_directory(image: &FatImage, root: RootDir, component: &str) -> Option<ShortEntry> {
    let mut result: Option<ShortEntry> = None;

    walker::walk(image, root, |entry, long_name| {
        let matches = match long_name {
            Some(name) => name == component,
            None => entry.short_name().eq_ignore_ascii_case(component),
        };

        if matches {
            result = Some(*entry);
            WalkControl::Stop
        } else {
            WalkControl::Continue
        }
    });

    result
}

/// Splits the trailing component off an absolute path, e.g. `/a/b` ->
/// (`/a`, `b`). Used by callers that need the parent directory and a leaf
/// name separately (not required by `search_entry` itself).
pub fn split_parent(abspath: &str) -> (String, String) {
    match abspath.rfind('/') {
        Some(0) => (String::from("/"), String::from(&abspath[1..])),
        Some(idx) => (String::from(&abspath[..idx]), String::from(&abspath[idx + 1..])),
        None => (String::from("/"), String::from(abspath)),
    }
}
