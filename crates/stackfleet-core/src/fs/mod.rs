//! Filesystem primitives shared across features.

pub mod archive;

use std::path::{Path, PathBuf};

pub use archive::package_code;

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_the_base() {
        assert_eq!(
            resolve_path(Path::new("/work/stacks"), "fn/src"),
            PathBuf::from("/work/stacks/fn/src")
        );
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(
            resolve_path(Path::new("/work"), "/opt/code"),
            PathBuf::from("/opt/code")
        );
    }
}
