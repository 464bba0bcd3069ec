//! Cache reading API.
//!
//! Provides the decoded, read-only view of an ld.so.cache file.

use crate::internal::cache_format::{self, ArchTag};
use crate::Error;
use camino::{Utf8Path, Utf8PathBuf};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// One ELF library record from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Library name the dynamic linker looks up (the cache key)
    pub soname: String,
    /// Absolute path the name maps to
    pub path: Utf8PathBuf,
    /// Raw flags word: bit 0 marks ELF, bits 8-15 carry the architecture tag
    pub flags: i32,
    pub osversion: u32,
    pub hwcap: u64,
}

impl CacheEntry {
    pub fn arch(&self) -> ArchTag {
        ArchTag::from_flags(self.flags)
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} [flags={:#x}, {}]",
            self.soname,
            self.path,
            self.flags,
            self.arch()
        )
    }
}

/// Summary of a decoded cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    /// ELF entries decoded
    pub num_entries: usize,
    /// Entries skipped because the ELF flag was clear
    pub num_skipped: usize,
    /// String table size as declared by the header
    pub len_strings: u32,
}

/// A fully decoded ld.so.cache.
///
/// Decoding is all-or-nothing: construction fails on the first structural
/// problem and never yields a partial entry list.
#[derive(Debug, Clone)]
pub struct Cache {
    entries: Vec<CacheEntry>,
    info: CacheInfo,
}

impl Cache {
    /// Decode a cache image held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let decoded = cache_format::decode_cache(data)?;

        let info = CacheInfo {
            num_entries: decoded.entries.len(),
            num_skipped: decoded.skipped,
            len_strings: decoded.header.len_strings,
        };
        debug!(
            "Decoded {} entries ({} non-ELF skipped)",
            info.num_entries, info.num_skipped
        );

        Ok(Self {
            entries: decoded.entries,
            info,
        })
    }

    /// Memory-map and decode a cache file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("Reading cache from {}", path.display());

        let file = File::open(path)?;
        // Zero-length files cannot be mapped
        if file.metadata()?.len() == 0 {
            return Self::from_bytes(&[]);
        }
        // Safety: the map is only read during decoding and dropped before
        // returning; all decoded strings are copied out.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(&mmap)
    }

    pub fn info(&self) -> CacheInfo {
        self.info
    }

    /// Entries in the order they are stored in the file.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    /// Entries whose name starts with `prefix` (case-sensitive).
    pub fn find<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.soname.starts_with(prefix))
    }

    /// First entry mapping exactly `soname`.
    pub fn lookup(&self, soname: &str) -> Option<&Utf8Path> {
        self.entries
            .iter()
            .find(|entry| entry.soname == soname)
            .map(|entry| entry.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Cache {
    type Item = &'a CacheEntry;
    type IntoIter = std::slice::Iter<'a, CacheEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
