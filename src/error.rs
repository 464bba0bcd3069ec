// Error types for ls-ldcache
use camino::Utf8PathBuf;
use std::io;

/// Failure to load or decode a cache file.
///
/// Every variant is terminal for the decode that produced it: once one
/// structural assumption is violated the remaining offsets cannot be trusted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported ld.so.cache magic {found:?}, only \"glibc-ld.so.cache\" is supported")]
    UnsupportedMagic { found: String },

    #[error("unsupported ld.so.cache version {found:?}, only \"1.1\" is supported")]
    UnsupportedVersion { found: String },

    #[error("cache truncated: need {needed} bytes at offset {offset:#x}")]
    Truncated { offset: usize, needed: usize },

    #[error("no string terminator within {limit} bytes at offset {offset:#x}")]
    StringTooLong { offset: usize, limit: usize },

    #[error("string offset {offset:#x} points inside the header or entry table")]
    OffsetOutOfRange { offset: u32 },

    /// Stricter than glibc's own tools, which print such strings as raw
    /// bytes: one non UTF-8 name or path rejects the whole cache.
    #[error("invalid UTF-8 in cache string at offset {offset:#x}")]
    InvalidUtf8 { offset: u32 },
}

/// Why a symlink walk stopped before reaching a regular file.
///
/// These are per-lookup diagnostics: the hops collected so far stay valid.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to check if {path} is a symlink: {source}")]
    StatFailed {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve symlink {path}: {source}")]
    ReadLinkFailed {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("symlink {path} has a non UTF-8 target")]
    NonUtf8Target { path: Utf8PathBuf },

    #[error("symlink cycle detected at {path}")]
    CycleDetected { path: Utf8PathBuf },

    #[error("gave up after {limit} symlink hops")]
    TooManyHops { limit: usize },
}
