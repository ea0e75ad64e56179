//! Logical path handling.
//!
//! Remote targets are always POSIX, whatever the gateway runs on, so paths
//! are plain `/`-separated strings rather than [`std::path::Path`]. Every
//! logical path is normalized lexically before use: `.` is dropped and `..`
//! can never climb above `/`, which keeps the mapping onto a volume's base
//! path from escaping it.

use crate::error::{Result, VfsError};

/// The logical root of every volume.
pub const ROOT: &str = "/";

/// Normalize a logical path to an absolute form without `.`/`..` segments.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Join a relative (or absolute) path onto a directory and normalize.
pub fn join(dir: &str, rel: &str) -> String {
    normalize(&format!("{dir}/{rel}"))
}

/// Parent directory of a logical path. The parent of `/` is `/`.
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Final component of a path, empty for the root.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether the path denotes the logical root.
pub fn is_root(path: &str) -> bool {
    normalize(path) == ROOT
}

/// Map a logical path onto the backend path under `base`.
pub fn physical(base: &str, logical: &str) -> String {
    let logical = normalize(logical);
    if is_root(base) {
        logical
    } else if logical == ROOT {
        normalize(base)
    } else {
        format!("{}{}", normalize(base), logical)
    }
}

/// Resolve where an uploaded file lands.
///
/// A hint that already names the file is taken as the full relative path,
/// a non-empty hint is a sub-directory of `dir`, otherwise the file goes
/// directly into `dir`.
pub fn resolve_upload_path(dir: &str, upload_hint: &str, filename: &str) -> String {
    let hint = upload_hint.trim_start_matches('/');
    if !filename.is_empty() && hint.contains(filename) {
        join(dir, hint)
    } else if !hint.is_empty() {
        join(&join(dir, hint), filename)
    } else {
        join(dir, filename)
    }
}

/// Reject names that would address something other than a single entry.
pub fn validate_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(VfsError::InvalidPath(format!("invalid file name: {name:?}")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(VfsError::InvalidPath(format!(
            "file name contains path separator: {name:?}"
        )));
    }
    Ok(name)
}

/// Insert `suffix` before the extension: `report.txt` → `report_copy.txt`.
///
/// Dot-files without a further extension get the suffix appended.
pub fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}{}{}", &name[..idx], suffix, &name[idx..]),
        _ => format!("{name}{suffix}"),
    }
}
