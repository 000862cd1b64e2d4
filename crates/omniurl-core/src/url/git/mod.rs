//! Files inside git repositories.
//!
//! A repository (plus optional ref) is cloned once per context into a
//! temporary directory; every URL into the same repository and ref reads
//! from that clone.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::{CancellableReader, ReadStream};

#[cfg(feature = "git")]
mod clone;


/// A path inside a git repository at an optional ref.
///
/// Credentials given as user-info in the repository URL are kept in memory
/// for cloning and never appear in the key or the display form.
#[derive(Clone)]
pub struct GitUrl {
    repository: String,
    path: String,
    reference: Option<String>,
    username: Option<String>,
    password: Option<String>,
    context: Arc<Context>,
}

impl GitUrl {
    /// `repository` may carry user-info credentials and a `#ref` fragment.
    pub(crate) fn with_context(repository: &str, path: &str, context: Arc<Context>) -> Self {
        let mut url = Self {
            repository: repository.to_string(),
            path: normalize(path),
            reference: None,
            username: None,
            password: None,
            context,
        };

        match url::Url::parse(repository) {
            Ok(mut parsed) => {
                if !parsed.username().is_empty() {
                    url.username = Some(parsed.username().to_string());
                    url.password = parsed.password().map(str::to_string);
                    let _ = parsed.set_username("");
                    let _ = parsed.set_password(None);
                }
                url.reference = parsed.fragment().map(str::to_string);
                parsed.set_fragment(None);
                url.repository = parsed.to_string();
            }
            Err(_) => {
                if let Some((repository, reference)) = repository.rsplit_once('#') {
                    url.repository = repository.to_string();
                    url.reference = Some(reference.to_string());
                }
            }
        }

        url.reference = url.reference.filter(|reference| !reference.is_empty());
        url
    }

    /// Repository URL without credentials or ref.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn format(&self) -> String {
        get_format(&self.path)
    }

    pub fn base(&self) -> GitUrl {
        self.with_path(paths::base(&self.path))
    }

    pub fn relative(&self, path: &str) -> GitUrl {
        self.with_path(paths::join(&self.path, path))
    }

    pub fn key(&self) -> String {
        format!("{}!/{}", self.clone_key(), self.path)
    }

    /// Identity of the clone this URL reads from: repository plus ref.
    pub fn clone_key(&self) -> String {
        match &self.reference {
            Some(reference) => format!("git:{}#{}", self.repository, reference),
            None => format!("git:{}", self.repository),
        }
    }

    /// Clone (or reuse the clone of) the repository and check that the path
    /// exists in it.
    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        let path = self.local_path(cancel)?;
        if path.try_exists()? {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        let path = self.local_path(cancel)?;
        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => self.not_found(),
            _ => Error::Io(err),
        })?;
        Ok(Box::new(CancellableReader::new(file, cancel)))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Local directory of the clone, cloning on first use.
    #[cfg(feature = "git")]
    pub fn clone_dir(&self, cancel: &CancellationToken) -> Result<PathBuf> {
        self.context
            .materialize_dir(&self.clone_key(), |dir| self.clone_into(dir, cancel))
    }

    #[cfg(not(feature = "git"))]
    pub fn clone_dir(&self, _cancel: &CancellationToken) -> Result<PathBuf> {
        Err(Error::NotImplemented("git support is disabled".to_string()))
    }

    #[cfg(not(feature = "git"))]
    pub fn pull(&self, _cancel: &CancellationToken) -> Result<()> {
        Err(Error::NotImplemented("git support is disabled".to_string()))
    }

    fn local_path(&self, cancel: &CancellationToken) -> Result<PathBuf> {
        if self.path == ".." || self.path.starts_with("../") {
            return Err(self.not_found());
        }
        let dir = self.clone_dir(cancel)?;
        Ok(dir.join(&self.path))
    }

    fn with_path(&self, path: String) -> GitUrl {
        let mut url = self.clone();
        url.path = normalize(&path);
        url
    }

    fn not_found(&self) -> Error {
        Error::not_found(format!(
            "path {:?} not found in git repository: {}",
            self.path, self.repository
        ))
    }
}

/// Clean `path` relative to the repository root, keeping a trailing `/`.
/// A path that climbs out of the root keeps its leading `..`.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let cleaned = paths::clean(trimmed);
    if cleaned == "." {
        String::new()
    } else if trimmed.ends_with('/') {
        format!("{cleaned}/")
    } else {
        cleaned
    }
}

impl Context {
    pub fn new_git_url(self: &Arc<Self>, repository: &str, path: &str) -> GitUrl {
        GitUrl::with_context(repository, path, self.clone())
    }

    pub fn new_valid_git_url(
        self: &Arc<Self>,
        repository: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<GitUrl> {
        let url = self.new_git_url(repository, path);
        url.validate(cancel)?;
        Ok(url)
    }
}
