//! Virtual path arithmetic.
//!
//! Virtual paths are absolute, use forward slashes, and never end with a
//! slash except for the root itself. Name comparisons are case-insensitive,
//! matching the most restrictive host filesystems entries may be extracted
//! onto, while the stored casing is preserved.

/// Root of the virtual tree
pub const ROOT: &str = "/";

/// Characters rejected in entry and folder names
pub const INVALID_NAME_CHARS: [char; 10] =
    ['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\0'];

/// Case-insensitive path or name equality.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// True if `name` contains a character that cannot appear in an entry name.
pub fn has_invalid_chars(name: &str) -> bool {
    name.is_empty() || name.chars().any(|c| INVALID_NAME_CHARS.contains(&c))
}

/// Parent folder of a path. The root is its own parent.
pub fn parent(path: &str) -> String {
    if path == ROOT {
        return ROOT.to_string();
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(pos) => trimmed[..pos].to_string(),
    }
}

/// Final component of a path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
}

/// Join a folder and a name into an absolute path.
pub fn join(folder: &str, name: &str) -> String {
    if folder == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", folder.trim_end_matches('/'), name)
    }
}

/// Strip `prefix` from the front of `path`, comparing case-insensitively
/// character by character. Returns the remainder of `path` in its original
/// casing. Byte offsets of the two casings may differ (some characters change
/// byte length when lowercased), so the remainder must never be derived by
/// slicing `path` at the prefix's byte length.
pub fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = path;
    for p in prefix.chars() {
        let mut rest_chars = rest.chars();
        let c = rest_chars.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
        rest = rest_chars.as_str();
    }
    Some(rest)
}

/// True if `path` lies strictly inside `folder` (case-insensitive).
pub fn is_descendant(path: &str, folder: &str) -> bool {
    if folder == ROOT {
        return path != ROOT && path.starts_with('/');
    }
    let folder = folder.trim_end_matches('/').to_lowercase();
    let path = path.to_lowercase();
    path.len() > folder.len() + 1 && path.starts_with(&folder) && path.as_bytes()[folder.len()] == b'/'
}
