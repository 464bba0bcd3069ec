//! Symlink chain resolution.
//!
//! Follows the path a cache entry points to, one link at a time, recording
//! every hop. Relative link targets are interpreted against the directory of
//! the link itself, absolute targets are taken as-is.

use crate::error::ResolveError;
use crate::internal::path::{link_target, normalize, under_root};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs;
use tracing::trace;

/// Same limit the Linux kernel applies to nested links (`MAXSYMLINKS`).
pub const DEFAULT_MAX_HOPS: usize = 40;

/// Walks symlink chains on the local filesystem.
///
/// ```no_run
/// use ls_ldcache::SymlinkResolver;
///
/// let resolver = SymlinkResolver::builder().max_hops(8).build();
/// let chain = resolver.resolve("/usr/lib/libc.so.6");
/// for hop in chain.hops() {
///     println!("- {}", hop);
/// }
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct SymlinkResolver {
    /// Alternative root: hops are looked up below it but reported as paths
    /// inside it, so absolute link targets stay within the image.
    #[builder(into)]
    root: Option<Utf8PathBuf>,

    /// Links followed before giving up.
    #[builder(default = DEFAULT_MAX_HOPS)]
    max_hops: usize,
}

impl Default for SymlinkResolver {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SymlinkResolver {
    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn root(&self) -> Option<&Utf8Path> {
        self.root.as_deref()
    }

    /// Follow `start` until a non-symlink is reached or a hop fails.
    ///
    /// The first hop is always `start`. Failures are attached to the
    /// returned chain rather than returned as an error, so callers resolving
    /// many entries can keep going.
    pub fn resolve(&self, start: impl AsRef<Utf8Path>) -> ResolvedChain {
        let mut current = start.as_ref().to_path_buf();
        let mut hops = Vec::new();
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(normalize(&current)) {
                return ResolvedChain::stopped(hops, ResolveError::CycleDetected { path: current });
            }
            if hops.len() > self.max_hops {
                return ResolvedChain::stopped(
                    hops,
                    ResolveError::TooManyHops {
                        limit: self.max_hops,
                    },
                );
            }

            hops.push(current.clone());
            let physical = under_root(self.root(), &current);

            let metadata = match fs::symlink_metadata(&physical) {
                Ok(metadata) => metadata,
                Err(source) => {
                    return ResolvedChain::stopped(
                        hops,
                        ResolveError::StatFailed {
                            path: current,
                            source,
                        },
                    )
                }
            };

            if !metadata.file_type().is_symlink() {
                trace!("{} is the final target", current);
                return ResolvedChain { hops, error: None };
            }

            let target = match fs::read_link(&physical) {
                Ok(target) => target,
                Err(source) => {
                    return ResolvedChain::stopped(
                        hops,
                        ResolveError::ReadLinkFailed {
                            path: current,
                            source,
                        },
                    )
                }
            };
            let Ok(target) = Utf8PathBuf::try_from(target) else {
                return ResolvedChain::stopped(hops, ResolveError::NonUtf8Target { path: current });
            };

            trace!("{} -> {}", current, target);
            current = link_target(&current, &target);
        }
    }
}

/// Resolve `path` with the default settings.
pub fn resolve_symlink_chain(path: impl AsRef<Utf8Path>) -> ResolvedChain {
    SymlinkResolver::default().resolve(path)
}

/// Ordered hops from a start path towards its real file.
#[derive(Debug)]
pub struct ResolvedChain {
    hops: Vec<Utf8PathBuf>,
    error: Option<ResolveError>,
}

impl ResolvedChain {
    fn stopped(hops: Vec<Utf8PathBuf>, error: ResolveError) -> Self {
        trace!("Resolution stopped: {}", error);
        Self {
            hops,
            error: Some(error),
        }
    }

    pub fn hops(&self) -> &[Utf8PathBuf] {
        &self.hops
    }

    /// Why the walk stopped early, if it did.
    pub fn error(&self) -> Option<&ResolveError> {
        self.error.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.error.is_none()
    }

    /// The final non-symlink path, when the walk completed.
    pub fn target(&self) -> Option<&Utf8Path> {
        if self.error.is_some() {
            return None;
        }
        self.hops.last().map(Utf8PathBuf::as_path)
    }

    pub fn into_parts(self) -> (Vec<Utf8PathBuf>, Option<ResolveError>) {
        (self.hops, self.error)
    }
}
