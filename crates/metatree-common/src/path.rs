//! Absolute path handling
//!
//! Every path entering the system is normalized to an absolute,
//! slash-separated form with no trailing slash; `"/"` is the root.
//! Concatenation is a semantic join over segments, never string
//! concatenation.

/// Normalize a path to absolute form.
///
/// Empty segments and `.` are dropped, `..` pops the previous segment, and
/// trailing slashes are removed. The result always starts with `/`.
pub fn normalize(path: &str) -> String {
    let mut segs: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            other => segs.push(other),
        }
    }
    if segs.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segs.join("/"))
    }
}

/// Join two paths semantically; the result is normalized.
pub fn join(base: &str, rest: &str) -> String {
    normalize(&format!("{}/{}", base, rest))
}

/// Split a normalized path into its segments; the root has none.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|seg| !seg.is_empty()).collect()
}

/// Rewrite `path` relative to `root`.
///
/// Returns `Some("/")` when the paths are equal, the `/`-prefixed remainder
/// when `path` is a descendant of `root`, and `None` otherwise. Both
/// arguments must be normalized.
pub fn rebase(path: &str, root: &str) -> Option<String> {
    if root == "/" {
        return Some(path.to_string());
    }
    if path == root {
        return Some("/".to_string());
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => Some(rest.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/a/b/"), "/a/b");
        assert_eq!(normalize("//a///b"), "/a/b");
        assert_eq!(normalize("/a/./b"), "/a/b");
        assert_eq!(normalize("/a/../b"), "/b");
        assert_eq!(normalize("/.."), "/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "/b/c"), "/a/b/c");
        assert_eq!(join("/a/", "b/"), "/a/b");
        assert_eq!(join("/a", "/"), "/a");
    }

    #[test]
    fn test_segments() {
        assert!(segments("/").is_empty());
        assert_eq!(segments("/a/b"), vec!["a", "b"]);
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/b", "/"), Some("/a/b".to_string()));
        assert_eq!(rebase("/a/b", "/a/b"), Some("/".to_string()));
        assert_eq!(rebase("/a/b/c", "/a/b"), Some("/c".to_string()));
        assert_eq!(rebase("/a/bc", "/a/b"), None);
        assert_eq!(rebase("/x", "/a"), None);
    }
}
