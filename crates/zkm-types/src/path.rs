//! Node path rules.
//!
//! Valid paths:
//! - Must start with `/`
//! - Must not end with `/` (except the root itself)
//! - Must not contain empty segments (`//`)
//! - Must not contain `.` or `..` segments
//! - Must not contain NUL or other control characters

use crate::error::{TypeError, TypeResult};

/// The root of every tree.
pub const ROOT: &str = "/";

/// Reserved subtree holding the server's quota and config nodes.
pub const SYSTEM_ROOT: &str = "/zookeeper";

/// Validate a node path, returning `Ok(())` if valid.
///
/// ```
/// use zkm_types::path::validate_path;
///
/// assert!(validate_path("/").is_ok());
/// assert!(validate_path("/app/config").is_ok());
/// assert!(validate_path("app").is_err());
/// assert!(validate_path("/app/").is_err());
/// ```
pub fn validate_path(path: &str) -> TypeResult<()> {
    let invalid = |reason: &str| TypeError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if path.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(invalid("must not contain control characters"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Parent of `path`, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`; empty for the root.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Append a child name to a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Path segments, root yields an empty list.
///
/// Ordering paths by their segment lists gives a pre-order walk with
/// byte-sorted siblings.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether `path` lies in the reserved system subtree.
pub fn is_system_path(path: &str) -> bool {
    path == SYSTEM_ROOT || path.starts_with("/zookeeper/")
}

/// Prefix `path` with `chroot`. A `None` chroot leaves the path unchanged.
pub fn prepend_chroot(chroot: Option<&str>, path: &str) -> String {
    match chroot {
        None => path.to_string(),
        Some(root) if path == ROOT => root.to_string(),
        Some(root) => format!("{root}{path}"),
    }
}

/// Strip `chroot` from a server-side path. Returns `None` when the path is
/// outside the chroot.
pub fn strip_chroot(chroot: Option<&str>, path: &str) -> Option<String> {
    match chroot {
        None => Some(path.to_string()),
        Some(root) if path == root => Some(ROOT.to_string()),
        Some(root) => path
            .strip_prefix(root)
            .filter(|rest| rest.starts_with('/'))
            .map(str::to_string),
    }
}

/// Every strict ancestor of `path`, outermost first, excluding the root.
pub fn ancestors(path: &str) -> Vec<String> {
    let segs = segments(path);
    let mut out = Vec::with_capacity(segs.len().saturating_sub(1));
    let mut current = String::new();
    for seg in segs.iter().take(segs.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(seg);
        out.push(current.clone());
    }
    out
}
