//! Path arithmetic and temporary-resource helpers.
//!
//! Paths inside containers (archives, repositories, the internal registry)
//! always use `/` regardless of platform, so they are handled lexically here
//! rather than through [`std::path`].

use std::io;
use std::path::{Component, Path, PathBuf};

/// Lexically clean a slash-separated path: collapse repeated separators,
/// drop `.` segments and resolve `..` against preceding segments.
///
/// Returns `"."` for an empty result, and keeps a leading `/`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join two slash-separated paths and clean the result.
pub fn join(base: &str, path: &str) -> String {
    match (base.is_empty(), path.is_empty()) {
        (true, true) => String::new(),
        (true, false) => clean(path),
        (false, true) => clean(base),
        (false, false) => clean(&format!("{base}/{path}")),
    }
}

/// The containing directory of a slash-separated path, always ending in `/`.
pub fn base(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        return "/".to_string();
    }
    let dir = match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) => clean(dir),
        None => ".".to_string(),
    };
    if dir.ends_with('/') {
        dir
    } else {
        format!("{dir}/")
    }
}

/// Lexically clean an OS path without touching the filesystem.
pub fn clean_file_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                ) && cleaned.pop();
                if !popped && !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Whether a path string names a directory (ends in a separator).
pub fn is_dir_path(path: &str) -> bool {
    path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR)
}

/// Prefix for temporary files and directories derived from a resource key.
pub fn temporary_prefix(key: &str) -> String {
    let hash = blake3::hash(key.as_bytes()).to_hex();
    format!("omniurl-{}-", &hash[..16])
}

/// Delete a temporary file; a file that is already gone is not an error.
pub fn delete_temporary_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "deleted temporary file");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "temporary file already deleted");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not delete temporary file");
            Err(err)
        }
    }
}

/// Delete a temporary directory tree; a missing directory is not an error.
pub fn delete_temporary_dir(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "deleted temporary dir");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "temporary dir already deleted");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not delete temporary dir");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots() {
        assert_eq!(clean("a/./b/../c"), "a/c");
        assert_eq!(clean("/a/../../b"), "/b");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean("a//b/"), "a/b");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn join_cleans_result() {
        assert_eq!(join("a/", "c.txt"), "a/c.txt");
        assert_eq!(join("./", "c.txt"), "c.txt");
        assert_eq!(join("a/b", "../c"), "a/c");
        assert_eq!(join("", "x"), "x");
    }

    #[test]
    fn base_ends_in_separator() {
        assert_eq!(base("a/b.txt"), "a/");
        assert_eq!(base("b.txt"), "./");
        assert_eq!(base("/b.txt"), "/");
        assert_eq!(base("a/b/"), "a/");
        assert_eq!(base("/"), "/");
    }

    #[test]
    fn clean_file_path_is_lexical() {
        assert_eq!(
            clean_file_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(clean_file_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(clean_file_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn temporary_prefix_is_stable_per_key() {
        assert_eq!(temporary_prefix("a"), temporary_prefix("a"));
        assert_ne!(temporary_prefix("a"), temporary_prefix("b"));
        assert!(temporary_prefix("a").starts_with("omniurl-"));
    }

    #[test]
    fn deleting_missing_temporaries_succeeds() {
        let temp = tempfile::TempDir::new().unwrap();
        delete_temporary_file(&temp.path().join("missing")).unwrap();
        delete_temporary_dir(&temp.path().join("missing-dir")).unwrap();
    }
}
