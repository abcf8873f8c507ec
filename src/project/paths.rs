//! Path helpers shared by the scanner and the sync engine.

use std::path::{Component, Path, PathBuf};

/// Device names Windows refuses as path components.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FORBIDDEN_CHARACTERS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// `path` relative to `root` when it lies inside it, `path` unchanged otherwise.
///
/// Both the given paths and their canonical forms are tried so symlinked roots
/// (e.g. `/tmp` on macOS) still compare equal.
pub fn relative_if_possible(path: &Path, root: &Path) -> PathBuf {
    if let Ok(rel) = path.strip_prefix(root) {
        return rel.to_path_buf();
    }
    if let (Ok(path_c), Ok(root_c)) = (path.canonicalize(), root.canonicalize()) {
        if let Ok(rel) = path_c.strip_prefix(&root_c) {
            return rel.to_path_buf();
        }
    }
    path.to_path_buf()
}

/// Whether `path` lies inside `root` (or is `root`).
pub fn is_inside(path: &Path, root: &Path) -> bool {
    relative_if_possible(path, root).is_relative()
}

/// Render `path` with `/` separators.
pub fn to_posix(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::CurDir => continue,
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// Turn a cloud project name into a path that is valid on every platform.
///
/// Characters forbidden on Windows become spaces, reserved device names get an
/// `_` suffix, and each component loses surrounding spaces and trailing dots.
/// Components left empty (including `.` and `..`) are dropped, so the result is
/// always a relative path below the directory it is joined to.
pub fn format_local_path(cloud_name: &str) -> String {
    let replaced: String = cloud_name
        .chars()
        .map(|c| if FORBIDDEN_CHARACTERS.contains(&c) { ' ' } else { c })
        .collect();

    let formatted = replaced
        .split('/')
        .map(|component| {
            let mut component = component.to_string();
            if RESERVED_NAMES
                .iter()
                .any(|reserved| component.eq_ignore_ascii_case(reserved))
            {
                component.push('_');
            }
            component.trim_matches(' ').trim_end_matches('.').to_string()
        })
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if formatted.is_empty() {
        "_".to_string()
    } else {
        formatted
    }
}
