//! Lexical path helpers used by the symlink resolver.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Lexically clean a path: drop `.` components and let `..` remove the
/// preceding component. `..` never climbs above the root of an absolute path.
///
/// The filesystem is not consulted, so `a/link/..` becomes `a` even when
/// `link` is itself a symlink.
pub(crate) fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut parts: Vec<&str> = Vec::new();
    let mut absolute = false;

    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => absolute = true,
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            Utf8Component::Normal(name) => parts.push(name),
        }
    }

    let mut out = if absolute {
        Utf8PathBuf::from("/")
    } else {
        Utf8PathBuf::new()
    };
    for part in parts {
        out.push(part);
    }
    if out.as_str().is_empty() {
        out.push(".");
    }
    out
}

/// Path of the hop `target` as seen from the symlink at `link`.
pub(crate) fn link_target(link: &Utf8Path, target: &Utf8Path) -> Utf8PathBuf {
    if target.is_absolute() {
        return target.to_path_buf();
    }
    let dir = link.parent().unwrap_or_else(|| Utf8Path::new(""));
    normalize(&dir.join(target))
}

/// Physical location of an in-image path under `root`.
pub(crate) fn under_root(root: Option<&Utf8Path>, path: &Utf8Path) -> Utf8PathBuf {
    match root {
        Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}
