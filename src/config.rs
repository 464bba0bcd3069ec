//! Run settings shared by the library and the `ls-ldcache` binary.

use crate::resolver::{SymlinkResolver, DEFAULT_MAX_HOPS};
use camino::{Utf8Path, Utf8PathBuf};

/// Cache location relative to the root.
pub const DEFAULT_CACHE_PATH: &str = "etc/ld.so.cache";

/// Where to find the cache and how to resolve what it points to.
///
/// ```
/// use ls_ldcache::Settings;
///
/// let settings = Settings::builder().root("/srv/rootfs").build();
/// assert_eq!(settings.cache_path(), "/srv/rootfs/etc/ld.so.cache");
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct Settings {
    /// Alternative root prefix (like chroot)
    #[builder(into, default = Utf8PathBuf::from("/"))]
    pub root: Utf8PathBuf,

    /// Explicit cache file, taken verbatim
    #[builder(into)]
    pub cache: Option<Utf8PathBuf>,

    /// Symlink hops followed before giving up
    #[builder(default = DEFAULT_MAX_HOPS)]
    pub max_hops: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// The cache file to read: the explicit one, or `etc/ld.so.cache` under
    /// the root.
    pub fn cache_path(&self) -> Utf8PathBuf {
        self.cache
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_CACHE_PATH))
    }

    /// Root to resolve under, `None` when it is the real `/`.
    pub fn effective_root(&self) -> Option<&Utf8Path> {
        let root = self.root.as_path();
        (root != Utf8Path::new("/") && !root.as_str().is_empty()).then_some(root)
    }

    pub fn resolver(&self) -> SymlinkResolver {
        SymlinkResolver::builder()
            .maybe_root(self.effective_root().map(Utf8Path::to_path_buf))
            .max_hops(self.max_hops)
            .build()
    }
}
