use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths::{clean_file_path, is_dir_path};
use crate::pipe::{CancellableReader, ReadStream};

use super::Url;

/// A path on the local filesystem. Directory paths end in a separator.
#[derive(Clone)]
pub struct FileUrl {
    path: PathBuf,
    context: Arc<Context>,
}

impl FileUrl {
    /// A file URL bound to a fresh, default context.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_context(path, Arc::new(Context::new()))
    }

    pub(crate) fn with_context(path: impl Into<PathBuf>, context: Arc<Context>) -> Self {
        Self {
            path: path.into(),
            context,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        is_dir_path(&self.path.to_string_lossy())
    }

    pub fn format(&self) -> String {
        get_format(&self.path.to_string_lossy())
    }

    pub fn base(&self) -> FileUrl {
        let parent = match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => self.path.clone(),
        };
        Self::with_context(with_dir_suffix(parent, true), self.context.clone())
    }

    pub fn relative(&self, path: &str) -> FileUrl {
        let joined = clean_file_path(&self.path.join(path));
        Self::with_context(with_dir_suffix(joined, is_dir_path(path)), self.context.clone())
    }

    pub fn valid_relative(&self, path: &str) -> Result<FileUrl> {
        self.context.new_valid_file_url(self.relative(path).path())
    }

    /// `file:///abs/path` for absolute paths (with a trailing `/` for
    /// directories), `file:` followed by the path otherwise.
    pub fn key(&self) -> String {
        if self.path.is_absolute() {
            let converted = if self.is_dir() {
                url::Url::from_directory_path(&self.path)
            } else {
                url::Url::from_file_path(&self.path)
            };
            if let Ok(url) = converted {
                return url.into();
            }
        }
        format!("file:{}", self.path.display())
    }

    pub fn validate(&self) -> Result<()> {
        check_file(&self.path, self.is_dir())
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        let file = File::open(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                Error::not_found(format!("file not found: {}", self.path.display()))
            }
            _ => Error::Io(err),
        })?;
        Ok(Box::new(CancellableReader::new(file, cancel)))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

// Relative paths display bare; everything else displays as its key.
impl fmt::Display for FileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_absolute() {
            f.write_str(&self.key())
        } else {
            write!(f, "{}", self.path.display())
        }
    }
}

impl Context {
    pub fn new_file_url(self: &Arc<Self>, path: impl Into<PathBuf>) -> FileUrl {
        FileUrl::with_context(path, self.clone())
    }

    /// A file URL for an existing file, or an existing directory when
    /// `path` ends in a separator. Relative paths are made absolute against
    /// the working directory.
    pub fn new_valid_file_url(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<FileUrl> {
        let path = path.as_ref();
        let dir = is_dir_path(&path.to_string_lossy());

        let absolute = if path.is_absolute() {
            clean_file_path(path)
        } else {
            clean_file_path(&std::env::current_dir()?.join(path))
        };
        check_file(&absolute, dir)?;

        Ok(self.new_file_url(with_dir_suffix(absolute, dir)))
    }

    /// The working directory as a directory file URL.
    pub fn working_dir_file_url(self: &Arc<Self>) -> Result<Url> {
        let dir = std::env::current_dir()?;
        Ok(self.new_file_url(with_dir_suffix(dir, true)).into())
    }
}

fn check_file(path: &Path, dir: bool) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::not_found(format!("file not found: {}", path.display())),
        _ => Error::Io(err),
    })?;

    if dir && !metadata.is_dir() {
        return Err(Error::not_found(format!(
            "URL path does not point to a directory: {}",
            path.display()
        )));
    }
    if !dir && !metadata.is_file() {
        return Err(Error::not_found(format!(
            "URL path does not point to a file: {}",
            path.display()
        )));
    }
    Ok(())
}

fn with_dir_suffix(path: PathBuf, dir: bool) -> PathBuf {
    if !dir || is_dir_path(&path.to_string_lossy()) {
        return path;
    }
    let mut raw = OsString::from(path);
    raw.push("/");
    PathBuf::from(raw)
}
