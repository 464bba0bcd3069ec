//! Low-level cache binary format implementation.
//!
//! This module decodes the `glibc-ld.so.cache` 1.1 layout:
//! - 48 byte header (magic, version, entry count, string table size, padding)
//! - `nlibs` fixed 24 byte entries
//! - a heap of NUL-terminated strings addressed by absolute file offsets
//!
//! Every read goes through [`Cursor`], which bounds-checks against the
//! buffer instead of overlaying structs, so a hostile file can at worst
//! produce an [`Error`].

use crate::reader::CacheEntry;
use crate::Error;
use camino::Utf8PathBuf;
use std::fmt;
use tracing::{debug, trace};

pub(crate) const CACHE_MAGIC: [u8; 17] = *b"glibc-ld.so.cache";
pub(crate) const CACHE_VERSION: [u8; 3] = *b"1.1";

pub(crate) const HEADER_SIZE: usize = 48;
pub(crate) const ENTRY_SIZE: usize = 24;

/// Upper bound on a single heap string, terminator included.
pub(crate) const MAX_STRING_LEN: usize = 4096;

// Flag constants from glibc sysdeps/generic/ldconfig.h
pub(crate) const FLAG_ELF: i32 = 0x0001;
pub(crate) const FLAG_ARCH_MASK: i32 = 0xff00;

pub(crate) const FLAG_I386_LIB32: u32 = 0x0000;
pub(crate) const FLAG_SPARC_LIB64: u32 = 0x0100;
pub(crate) const FLAG_IA64_LIB64: u32 = 0x0200;
pub(crate) const FLAG_X8664_LIB64: u32 = 0x0300;
pub(crate) const FLAG_S390_LIB64: u32 = 0x0400;
pub(crate) const FLAG_POWERPC_LIB64: u32 = 0x0500;
pub(crate) const FLAG_MIPS64_LIBN32: u32 = 0x0600;
pub(crate) const FLAG_MIPS64_LIBN64: u32 = 0x0700;
pub(crate) const FLAG_X8664_LIBX32: u32 = 0x0800;
pub(crate) const FLAG_ARM_LIBHF: u32 = 0x0900;
pub(crate) const FLAG_AARCH64_LIB64: u32 = 0x0a00;
pub(crate) const FLAG_ARM_LIBSF: u32 = 0x0b00;
pub(crate) const FLAG_MIPS_LIB32_NAN2008: u32 = 0x0c00;
pub(crate) const FLAG_MIPS64_LIBN32_NAN2008: u32 = 0x0d00;
pub(crate) const FLAG_MIPS64_LIBN64_NAN2008: u32 = 0x0e00;
pub(crate) const FLAG_RISCV_FLOAT_ABI_SOFT: u32 = 0x0f00;
pub(crate) const FLAG_RISCV_FLOAT_ABI_DOUBLE: u32 = 0x1000;
pub(crate) const FLAG_LARCH_FLOAT_ABI_SOFT: u32 = 0x1100;
pub(crate) const FLAG_LARCH_FLOAT_ABI_DOUBLE: u32 = 0x1200;

static ARCH_NAMES: &[(u32, &str)] = &[
    (FLAG_I386_LIB32, "I386_LIB32"),
    (FLAG_SPARC_LIB64, "SPARC_LIB64"),
    (FLAG_IA64_LIB64, "IA64_LIB64"),
    (FLAG_X8664_LIB64, "X8664_LIB64"),
    (FLAG_S390_LIB64, "S390_LIB64"),
    (FLAG_POWERPC_LIB64, "POWERPC_LIB64"),
    (FLAG_MIPS64_LIBN32, "MIPS64_LIBN32"),
    (FLAG_MIPS64_LIBN64, "MIPS64_LIBN64"),
    (FLAG_X8664_LIBX32, "X8664_LIBX32"),
    (FLAG_ARM_LIBHF, "ARM_LIBHF"),
    (FLAG_AARCH64_LIB64, "AARCH64_LIB64"),
    (FLAG_ARM_LIBSF, "ARM_LIBSF"),
    (FLAG_MIPS_LIB32_NAN2008, "MIPS_LIB32_NAN2008"),
    (FLAG_MIPS64_LIBN32_NAN2008, "MIPS64_LIBN32_NAN2008"),
    (FLAG_MIPS64_LIBN64_NAN2008, "MIPS64_LIBN64_NAN2008"),
    (FLAG_RISCV_FLOAT_ABI_SOFT, "RISCV_FLOAT_ABI_SOFT"),
    (FLAG_RISCV_FLOAT_ABI_DOUBLE, "RISCV_FLOAT_ABI_DOUBLE"),
    (FLAG_LARCH_FLOAT_ABI_SOFT, "LARCH_FLOAT_ABI_SOFT"),
    (FLAG_LARCH_FLOAT_ABI_DOUBLE, "LARCH_FLOAT_ABI_DOUBLE"),
];

/// Architecture/ABI tag stored in bits 8-15 of an entry's flags.
///
/// Purely diagnostic: unknown tags are kept as their raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchTag(u32);

impl ArchTag {
    pub fn from_flags(flags: i32) -> Self {
        Self((flags & FLAG_ARCH_MASK) as u32)
    }

    /// The masked tag value, e.g. `0x0300`.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Symbolic glibc name of the tag, if it is a known one.
    pub fn name(self) -> Option<&'static str> {
        ARCH_NAMES
            .iter()
            .find(|(tag, _)| *tag == self.0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for ArchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arch={:#x}", self.0)?;
        if let Some(name) = self.name() {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheHeader {
    pub nlibs: u32,
    pub len_strings: u32,
}

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    flags: i32,
    key: u32,
    value: u32,
    osversion: u32,
    hwcap: u64,
}

/// Result of a full decode.
#[derive(Debug)]
pub(crate) struct DecodedCache {
    pub header: CacheHeader,
    pub entries: Vec<CacheEntry>,
    pub skipped: usize,
}

/// Bounds-checked little-endian reader over the cache buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let bytes = self
            .pos
            .checked_add(len)
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or(Error::Truncated {
                offset: self.pos,
                needed: len,
            })?;
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, Error> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, Error> {
        self.array().map(u64::from_le_bytes)
    }
}

fn parse_header(cursor: &mut Cursor<'_>) -> Result<CacheHeader, Error> {
    let magic: [u8; 17] = cursor.array()?;
    if magic != CACHE_MAGIC {
        return Err(Error::UnsupportedMagic {
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }

    let version: [u8; 3] = cursor.array()?;
    if version != CACHE_VERSION {
        return Err(Error::UnsupportedVersion {
            found: String::from_utf8_lossy(&version).into_owned(),
        });
    }

    let nlibs = cursor.u32()?;
    let len_strings = cursor.u32()?;

    // unused[5]
    cursor.take(5 * 4)?;

    Ok(CacheHeader { nlibs, len_strings })
}

fn parse_entry(cursor: &mut Cursor<'_>) -> Result<RawEntry, Error> {
    Ok(RawEntry {
        flags: cursor.i32()?,
        key: cursor.u32()?,
        value: cursor.u32()?,
        osversion: cursor.u32()?,
        hwcap: cursor.u64()?,
    })
}

/// Read the NUL-terminated string at absolute `offset`.
///
/// `heap_start` is the first byte after the entry table; nothing below it
/// can hold a string.
pub(crate) fn read_string(data: &[u8], offset: u32, heap_start: usize) -> Result<&str, Error> {
    let start = offset as usize;
    if start < heap_start {
        return Err(Error::OffsetOutOfRange { offset });
    }

    let remaining = match data.get(start..) {
        Some(rest) if !rest.is_empty() => rest,
        _ => {
            return Err(Error::Truncated {
                offset: start,
                needed: 1,
            })
        }
    };

    let window = &remaining[..remaining.len().min(MAX_STRING_LEN)];
    let Some(end) = memchr::memchr(0, window) else {
        return Err(if remaining.len() >= MAX_STRING_LEN {
            Error::StringTooLong {
                offset: start,
                limit: MAX_STRING_LEN,
            }
        } else {
            Error::Truncated {
                offset: start,
                needed: remaining.len() + 1,
            }
        });
    };

    std::str::from_utf8(&window[..end]).map_err(|_| Error::InvalidUtf8 { offset })
}

/// Decode a whole cache buffer, preserving entry order.
pub(crate) fn decode_cache(data: &[u8]) -> Result<DecodedCache, Error> {
    let mut cursor = Cursor::new(data, 0);
    let header = parse_header(&mut cursor)?;

    debug!(
        "Cache header: {} entries, {} string bytes",
        header.nlibs, header.len_strings
    );

    // Validate the table extent before trusting nlibs for anything else.
    let table_len = (header.nlibs as usize)
        .checked_mul(ENTRY_SIZE)
        .ok_or(Error::Truncated {
            offset: HEADER_SIZE,
            needed: usize::MAX,
        })?;
    let heap_start = HEADER_SIZE
        .checked_add(table_len)
        .filter(|end| *end <= data.len())
        .ok_or(Error::Truncated {
            offset: HEADER_SIZE,
            needed: table_len,
        })?;

    let mut entries = Vec::with_capacity(header.nlibs as usize);
    let mut skipped = 0;

    for index in 0..header.nlibs {
        let raw = parse_entry(&mut cursor)?;

        if raw.flags & FLAG_ELF == 0 {
            trace!("Skipping non-ELF entry {} (flags={:#x})", index, raw.flags);
            skipped += 1;
            continue;
        }

        let soname = read_string(data, raw.key, heap_start)?;
        let path = read_string(data, raw.value, heap_start)?;

        entries.push(CacheEntry {
            soname: soname.to_string(),
            path: Utf8PathBuf::from(path),
            flags: raw.flags,
            osversion: raw.osversion,
            hwcap: raw.hwcap,
        });
    }

    Ok(DecodedCache {
        header,
        entries,
        skipped,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds cache images for tests. Strings are laid out after the entry
    /// table in insertion order.
    #[derive(Default)]
    pub(crate) struct CacheImage {
        entries: Vec<(i32, String, String)>,
    }

    impl CacheImage {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn entry(mut self, flags: i32, key: &str, value: &str) -> Self {
            self.entries.push((flags, key.to_string(), value.to_string()));
            self
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            let heap_start = HEADER_SIZE + self.entries.len() * ENTRY_SIZE;
            let mut heap = Vec::new();
            let mut table = Vec::new();

            for (flags, key, value) in &self.entries {
                let key_offset = (heap_start + heap.len()) as u32;
                heap.extend_from_slice(key.as_bytes());
                heap.push(0);
                let value_offset = (heap_start + heap.len()) as u32;
                heap.extend_from_slice(value.as_bytes());
                heap.push(0);

                table.extend_from_slice(&flags.to_le_bytes());
                table.extend_from_slice(&key_offset.to_le_bytes());
                table.extend_from_slice(&value_offset.to_le_bytes());
                table.extend_from_slice(&0u32.to_le_bytes());
                table.extend_from_slice(&0u64.to_le_bytes());
            }

            let mut data = header_bytes(self.entries.len() as u32, heap.len() as u32);
            data.extend_from_slice(&table);
            data.extend_from_slice(&heap);
            data
        }
    }

    pub(crate) fn header_bytes(nlibs: u32, len_strings: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE);
        data.extend_from_slice(&CACHE_MAGIC);
        data.extend_from_slice(&CACHE_VERSION);
        data.extend_from_slice(&nlibs.to_le_bytes());
        data.extend_from_slice(&len_strings.to_le_bytes());
        data.extend_from_slice(&[0u8; 20]);
        data
    }

    fn raw_entry(flags: i32, key: u32, value: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(ENTRY_SIZE);
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&key.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data
    }

    #[test]
    fn empty_cache_has_no_entries() {
        let decoded = decode_cache(&header_bytes(0, 0)).unwrap();
        assert!(decoded.entries.is_empty());
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.header.nlibs, 0);
    }

    #[test]
    fn decodes_single_entry() {
        let data = CacheImage::new()
            .entry(0x0001, "libfoo.so.1", "/usr/lib/libfoo.so.1.2.3")
            .build();

        let decoded = decode_cache(&data).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].soname, "libfoo.so.1");
        assert_eq!(decoded.entries[0].path, "/usr/lib/libfoo.so.1.2.3");
        assert_eq!(decoded.entries[0].flags, 0x0001);
    }

    #[test]
    fn keeps_stored_order() {
        let data = CacheImage::new()
            .entry(0x0303, "libz.so.1", "/lib/libz.so.1")
            .entry(0x0303, "liba.so.1", "/lib/liba.so.1")
            .entry(0x0303, "libm.so.6", "/lib/libm.so.6")
            .build();

        let names: Vec<_> = decode_cache(&data)
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.soname)
            .collect();
        assert_eq!(names, ["libz.so.1", "liba.so.1", "libm.so.6"]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = header_bytes(0, 0);
        data[0] = b'G';
        assert!(matches!(
            decode_cache(&data),
            Err(Error::UnsupportedMagic { .. })
        ));
    }

    #[test]
    fn rejects_old_format_magic() {
        let mut data = b"ld.so-1.7.0".to_vec();
        data.resize(HEADER_SIZE, 0);
        assert!(matches!(
            decode_cache(&data),
            Err(Error::UnsupportedMagic { .. })
        ));
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = CacheImage::new()
            .entry(0x0001, "libfoo.so.1", "/usr/lib/libfoo.so.1")
            .build();
        data[19] = b'2';
        match decode_cache(&data) {
            Err(Error::UnsupportedVersion { found }) => assert_eq!(found, "1.2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn short_header_is_truncated() {
        let data = header_bytes(0, 0);
        assert!(matches!(
            decode_cache(&data[..40]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn entry_count_beyond_buffer_is_truncated() {
        let mut data = header_bytes(u32::MAX, 0);
        data.extend_from_slice(&raw_entry(0x0001, 0, 0));
        assert!(matches!(
            decode_cache(&data),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn non_elf_entries_are_skipped_without_reading_strings() {
        let mut data = header_bytes(2, 0);
        // Offsets are garbage, but the ELF bit is clear.
        data.extend_from_slice(&raw_entry(0x0300, u32::MAX, 7));
        data.extend_from_slice(&raw_entry(0x0000, 3, u32::MAX));

        let decoded = decode_cache(&data).unwrap();
        assert!(decoded.entries.is_empty());
        assert_eq!(decoded.skipped, 2);
    }

    #[test]
    fn offset_past_end_is_truncated() {
        let mut data = header_bytes(1, 0);
        data.extend_from_slice(&raw_entry(0x0001, 10_000, 10_000));
        assert!(matches!(
            decode_cache(&data),
            Err(Error::Truncated { offset: 10_000, .. })
        ));
    }

    #[test]
    fn missing_terminator_is_truncated() {
        let mut data = header_bytes(1, 0);
        let heap = (HEADER_SIZE + ENTRY_SIZE) as u32;
        data.extend_from_slice(&raw_entry(0x0001, heap, heap));
        data.extend_from_slice(b"libfoo.so");
        assert!(matches!(
            decode_cache(&data),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut data = header_bytes(1, 0);
        let heap = (HEADER_SIZE + ENTRY_SIZE) as u32;
        data.extend_from_slice(&raw_entry(0x0001, heap, heap));
        data.extend_from_slice(&vec![b'a'; MAX_STRING_LEN + 16]);
        data.push(0);
        assert!(matches!(
            decode_cache(&data),
            Err(Error::StringTooLong { limit: MAX_STRING_LEN, .. })
        ));
    }

    #[test]
    fn longest_allowed_string_decodes() {
        let long = "a".repeat(MAX_STRING_LEN - 1);
        let data = CacheImage::new().entry(0x0001, &long, "/x").build();
        let decoded = decode_cache(&data).unwrap();
        assert_eq!(decoded.entries[0].soname.len(), MAX_STRING_LEN - 1);
    }

    #[test]
    fn offset_into_entry_table_is_rejected() {
        let mut data = header_bytes(1, 0);
        data.extend_from_slice(&raw_entry(0x0001, 4, 4));
        data.extend_from_slice(b"\0");
        assert!(matches!(
            decode_cache(&data),
            Err(Error::OffsetOutOfRange { offset: 4 })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut data = header_bytes(1, 0);
        let heap = (HEADER_SIZE + ENTRY_SIZE) as u32;
        data.extend_from_slice(&raw_entry(0x0001, heap, heap));
        data.extend_from_slice(&[0xff, 0xfe, 0x00]);
        assert!(matches!(
            decode_cache(&data),
            Err(Error::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn error_after_valid_entries_discards_everything() {
        let mut data = CacheImage::new()
            .entry(0x0001, "libok.so.1", "/lib/libok.so.1")
            .entry(0x0001, "libbad.so.1", "/lib/libbad.so.1")
            .build();
        // Point the second entry's key past the end.
        let key_pos = HEADER_SIZE + ENTRY_SIZE + 4;
        data[key_pos..key_pos + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode_cache(&data).is_err());
    }

    #[test]
    fn arch_tag_names() {
        assert_eq!(ArchTag::from_flags(0x0303).name(), Some("X8664_LIB64"));
        assert_eq!(ArchTag::from_flags(0x0300).raw(), FLAG_X8664_LIB64);
        assert_eq!(ArchTag::from_flags(0x0a01).name(), Some("AARCH64_LIB64"));

        let unknown = ArchTag::from_flags(0x1300);
        assert_eq!(unknown.raw(), 0x1300);
        assert_eq!(unknown.name(), None);
    }

    #[test]
    fn arch_tag_display() {
        assert_eq!(
            ArchTag::from_flags(0x0303).to_string(),
            "arch=0x300 (X8664_LIB64)"
        );
        assert_eq!(ArchTag::from_flags(0x1301).to_string(), "arch=0x1300");
    }
}
