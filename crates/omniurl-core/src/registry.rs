//! In-process registry backing `internal:` URLs.
//!
//! A registry is an ordinary value: contexts share one through an [`Arc`],
//! and tests construct isolated instances.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pipe::{CancellableReader, ReadStream};

/// Supplies content for internal paths on demand.
pub trait InternalProvider: Send + Sync {
    fn open_path(&self, path: &str, cancel: &CancellationToken) -> Result<ReadStream>;
}

/// Content stored under an internal path.
#[derive(Clone)]
pub enum InternalContent {
    Bytes(Arc<[u8]>),
    Provider(Arc<dyn InternalProvider>),
}

impl InternalContent {
    pub fn provider(provider: impl InternalProvider + 'static) -> Self {
        Self::Provider(Arc::new(provider))
    }

    /// Content holding the [`Display`](fmt::Display) rendering of `value`.
    pub fn display(value: impl fmt::Display) -> Self {
        Self::from(value.to_string())
    }

    pub(crate) fn open(&self, path: &str, cancel: &CancellationToken) -> Result<ReadStream> {
        match self {
            Self::Bytes(bytes) => Ok(Box::new(CancellableReader::new(
                Cursor::new(ArcBytes(bytes.clone())),
                cancel,
            ))),
            Self::Provider(provider) => provider.open_path(path, cancel),
        }
    }
}

impl fmt::Debug for InternalContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Provider(_) => f.write_str("Provider"),
        }
    }
}

impl Default for InternalContent {
    fn default() -> Self {
        Self::Bytes(Arc::from(Vec::new()))
    }
}

impl From<Vec<u8>> for InternalContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Arc::from(bytes))
    }
}

impl From<&[u8]> for InternalContent {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Arc::from(bytes))
    }
}

impl From<String> for InternalContent {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl From<&str> for InternalContent {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl From<Arc<dyn InternalProvider>> for InternalContent {
    fn from(provider: Arc<dyn InternalProvider>) -> Self {
        Self::Provider(provider)
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Path → content map shared by every context that holds it.
#[derive(Default)]
pub struct InternalRegistry {
    entries: RwLock<HashMap<String, InternalContent>>,
}

impl InternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content under `path`, failing if the path is taken.
    pub fn register(&self, path: impl Into<String>, content: impl Into<InternalContent>) -> Result<()> {
        let path = path.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&path) {
            return Err(Error::AlreadyRegistered(path));
        }
        entries.insert(path, content.into());
        Ok(())
    }

    /// Store content under `path`, replacing anything already there.
    pub fn update(&self, path: impl Into<String>, content: impl Into<InternalContent>) {
        self.entries.write().insert(path.into(), content.into());
    }

    pub fn deregister(&self, path: &str) {
        self.entries.write().remove(path);
    }

    pub fn load(&self, path: &str) -> Option<InternalContent> {
        self.entries.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Walk `root` and register every file for which `process` returns an
    /// internal path. `process` receives paths relative to `root`, using `/`.
    pub fn register_dir<F>(&self, root: &Path, mut process: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = std::fs::read_dir(&dir)?.collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(|entry| entry.file_name());
            for entry in entries {
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let relative = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if let Some(internal_path) = process(&relative) {
                    let content = std::fs::read(&path)?;
                    self.register(internal_path, content)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for InternalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalRegistry")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn read_all(content: &InternalContent, path: &str) -> Vec<u8> {
        let mut reader = content.open(path, &CancellationToken::new()).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = InternalRegistry::new();
        registry.register("a", "first").unwrap();

        let err = registry.register("a", "second").unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(path) if path == "a"));
        assert_eq!(read_all(&registry.load("a").unwrap(), "a"), b"first");
    }

    #[test]
    fn update_overwrites() {
        let registry = InternalRegistry::new();
        registry.register("a", "first").unwrap();
        registry.update("a", "second");
        assert_eq!(read_all(&registry.load("a").unwrap(), "a"), b"second");
    }

    #[test]
    fn deregister_removes() {
        let registry = InternalRegistry::new();
        registry.register("a", vec![1u8, 2, 3]).unwrap();
        registry.deregister("a");
        assert!(registry.load("a").is_none());
    }

    #[test]
    fn display_values_become_bytes() {
        let content = InternalContent::display(12345);
        assert_eq!(read_all(&content, "int"), b"12345");
    }

    #[test]
    fn registries_are_isolated() {
        let first = InternalRegistry::new();
        let second = InternalRegistry::new();
        first.register("shared", "x").unwrap();
        assert!(!second.contains("shared"));
    }

    #[test]
    fn register_dir_uses_slash_paths() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("nested/b.yaml"), "b").unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();

        let registry = InternalRegistry::new();
        registry
            .register_dir(temp.path(), |path| {
                path.ends_with(".yaml").then(|| format!("profiles/{path}"))
            })
            .unwrap();

        assert!(registry.contains("profiles/nested/b.yaml"));
        assert!(!registry.contains("profiles/a.txt"));
    }
}
