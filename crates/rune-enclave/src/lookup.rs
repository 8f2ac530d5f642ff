//! Executable search-path lookup for payload command lines.
//!
//! Some enclave platforms run payloads from a filesystem the host cannot see,
//! so a failed lookup is not an error: callers fall back to the name as given.

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Find `name` the way a shell would.
///
/// Names containing a `/` are checked directly and returned unchanged.
/// Bare names are searched in `search_path` (a `PATH`-style list); empty and
/// relative entries are skipped, so a hit is always an absolute path.
pub fn lookup_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') {
        let path = Path::new(name);
        return is_executable(path).then(|| path.to_path_buf());
    }

    std::env::split_paths(search_path?)
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve `name` on `search_path`, or return it unchanged if that fails.
pub fn resolve_or_passthrough(name: &str, search_path: Option<&OsStr>) -> String {
    lookup_executable(name, search_path)
        .and_then(|p| p.into_os_string().into_string().ok())
        .unwrap_or_else(|| name.to_owned())
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
