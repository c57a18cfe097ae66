//! Repository root discovery and path helpers.

use std::env;
use std::path::{Path, PathBuf};

/// Markers that identify the repository root.
const ROOT_MARKERS: [&str; 2] = ["AGENTS.MD", ".git"];

/// Walk up from `start` to the first directory containing a root marker.
///
/// Falls back to `start` when no ancestor has one.
pub fn find_repo_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// Resolve `path` against `root` unless it is already absolute.
pub fn resolve(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Render a path with forward slashes so progress entries are portable.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Locate an executable the way a shell would.
///
/// Names containing a path separator are checked directly; bare names are
/// searched on `PATH` (with the usual extensions on Windows).
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search).find_map(|dir| executable_in(&dir, name))
}

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if candidate.is_file() {
        return Some(candidate);
    }
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            let with_ext = candidate.with_extension(ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
    }
    None
}
