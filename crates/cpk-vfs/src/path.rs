//! Virtual path normalization
//!
//! Callers may address entries with either `/` or `\` separators and in any
//! ASCII letter case. Internally every path is ASCII-lowercased, `/`
//! separated, without leading, trailing or repeated separators. Non-ASCII
//! letters are kept as stored.

/// Separator used in normalized virtual paths
pub const SEPARATOR: char = '/';

/// Separator the CPK format uses when hashing full entry paths
pub const ARCHIVE_SEPARATOR: char = '\\';

/// Normalize a virtual path.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
    {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(&segment.to_ascii_lowercase());
    }
    out
}

/// Normalize a listing prefix.
///
/// Unlike [`normalize`], a trailing separator is kept so that `"sys/"` only
/// matches entries inside `sys` and not `system`.
pub fn normalize_prefix(prefix: &str) -> String {
    let mut out = normalize(prefix);
    if !out.is_empty() && prefix.ends_with(['/', '\\']) {
        out.push(SEPARATOR);
    }
    out
}

/// Join a parent path and a child name.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{SEPARATOR}{name}")
    }
}

/// Convert a normalized path into the form the archive hashes.
pub(crate) fn to_archive_form(path: &str) -> String {
    path.replace(SEPARATOR, &ARCHIVE_SEPARATOR.to_string())
}
