// ls-ldcache - glibc ld.so.cache inspector
// MIT OR Apache-2.0, 2025

//! Read glibc `ld.so.cache` files and follow the library symlinks they name.
//!
//! This library provides:
//! - A bounds-checked decoder for the `glibc-ld.so.cache` 1.1 format
//! - Architecture tag lookup for entry flags
//! - A symlink chain resolver with cycle and hop-limit detection
//!
//! # Example: List a cache
//!
//! ```no_run
//! use ls_ldcache::Cache;
//!
//! let cache = Cache::from_file("/etc/ld.so.cache")?;
//! print!("{}", cache);
//! # Ok::<(), ls_ldcache::Error>(())
//! ```
//!
//! # Example: Resolve every libc entry
//!
//! ```no_run
//! use ls_ldcache::{Cache, SymlinkResolver};
//!
//! let cache = Cache::from_file("/etc/ld.so.cache")?;
//! let resolver = SymlinkResolver::default();
//! for entry in cache.find("libc.") {
//!     let chain = resolver.resolve(&entry.path);
//!     println!("{} -> {:?}", entry.soname, chain.target());
//! }
//! # Ok::<(), ls_ldcache::Error>(())
//! ```

mod internal;

pub mod config;
pub mod error;
pub mod reader;
pub mod resolver;

pub use config::Settings;
pub use error::{Error, ResolveError};
pub use internal::cache_format::ArchTag;
pub use reader::{Cache, CacheEntry, CacheInfo};
pub use resolver::{resolve_symlink_chain, ResolvedChain, SymlinkResolver};

/// Decode a cache image; shorthand for [`Cache::from_bytes`].
pub fn decode_cache(data: &[u8]) -> Result<Cache, Error> {
    Cache::from_bytes(data)
}

/// Symbolic name of the architecture tag embedded in `flags`, if known.
pub fn arch_tag_name(flags: i32) -> Option<&'static str> {
    ArchTag::from_flags(flags).name()
}
