//! The URL sum type and its scheme-specific variants.

mod docker;
mod file;
mod git;
mod internal;
mod network;
mod tarball;
mod zip;

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use docker::DockerUrl;
pub use file::FileUrl;
pub use git::GitUrl;
pub use internal::InternalUrl;
pub use network::NetworkUrl;
pub use tarball::TarballUrl;
pub use zip::ZipUrl;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipe::ReadStream;

/// A resource locator bound to a [`Context`].
///
/// Every variant has a canonical [`key`](Url::key) and can be opened for
/// reading. Archive variants wrap another `Url`, so archives nest to any
/// depth.
#[derive(Clone)]
pub enum Url {
    File(FileUrl),
    Network(NetworkUrl),
    Git(GitUrl),
    Docker(DockerUrl),
    Tarball(TarballUrl),
    Zip(ZipUrl),
    Internal(InternalUrl),
}

impl Url {
    /// Content format tag, e.g. `yaml` or `tar.gz`; empty when unknown.
    pub fn format(&self) -> String {
        match self {
            Self::File(url) => url.format(),
            Self::Network(url) => url.format(),
            Self::Git(url) => url.format(),
            Self::Docker(url) => url.format(),
            Self::Tarball(url) => url.format(),
            Self::Zip(url) => url.format(),
            Self::Internal(url) => url.format(),
        }
    }

    /// The containing directory, ending in `/`. Not necessarily openable.
    pub fn base(&self) -> Url {
        match self {
            Self::File(url) => url.base().into(),
            Self::Network(url) => url.base().into(),
            Self::Git(url) => url.base().into(),
            Self::Docker(url) => url.base().into(),
            Self::Tarball(url) => url.base().into(),
            Self::Zip(url) => url.base().into(),
            Self::Internal(url) => url.base().into(),
        }
    }

    /// A URL of the same variant addressing `path` relative to this one.
    pub fn relative(&self, path: &str) -> Result<Url> {
        Ok(match self {
            Self::File(url) => url.relative(path).into(),
            Self::Network(url) => url.relative(path)?.into(),
            Self::Git(url) => url.relative(path).into(),
            Self::Docker(url) => url.relative(path)?.into(),
            Self::Tarball(url) => url.relative(path).into(),
            Self::Zip(url) => url.relative(path).into(),
            Self::Internal(url) => url.relative(path).into(),
        })
    }

    /// Like [`relative`](Url::relative), but also checks that the result
    /// exists.
    pub fn valid_relative(&self, path: &str, cancel: &CancellationToken) -> Result<Url> {
        if let Self::File(url) = self {
            return url.valid_relative(path).map(Self::File);
        }
        let url = self.relative(path)?;
        url.validate(cancel)?;
        Ok(url)
    }

    /// Check that the addressed resource exists, as cheaply as the variant
    /// allows.
    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Self::File(url) => url.validate(),
            Self::Network(url) => url.validate(cancel),
            Self::Git(url) => url.validate(cancel),
            Self::Docker(url) => url.validate(cancel),
            Self::Tarball(url) => url.validate(cancel),
            Self::Zip(url) => url.validate(cancel),
            Self::Internal(url) => url.validate(),
        }
    }

    /// Canonical identity, stable across runs and usable as a map key.
    pub fn key(&self) -> String {
        match self {
            Self::File(url) => url.key(),
            Self::Network(url) => url.key(),
            Self::Git(url) => url.key(),
            Self::Docker(url) => url.key(),
            Self::Tarball(url) => url.key(),
            Self::Zip(url) => url.key(),
            Self::Internal(url) => url.key(),
        }
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        match self {
            Self::File(url) => url.open(cancel),
            Self::Network(url) => url.open(cancel),
            Self::Git(url) => url.open(cancel),
            Self::Docker(url) => url.open(cancel),
            Self::Tarball(url) => url.open(cancel),
            Self::Zip(url) => url.open(cancel),
            Self::Internal(url) => url.open(cancel),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        match self {
            Self::File(url) => url.context(),
            Self::Network(url) => url.context(),
            Self::Git(url) => url.context(),
            Self::Docker(url) => url.context(),
            Self::Tarball(url) => url.context(),
            Self::Zip(url) => url.context(),
            Self::Internal(url) => url.context(),
        }
    }

    pub fn read_bytes(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut reader = self.open(cancel)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(Error::from_io)?;
        Ok(buf)
    }

    pub fn read_string(&self, cancel: &CancellationToken) -> Result<String> {
        let mut reader = self.open(cancel)?;
        let mut buf = String::new();
        reader.read_to_string(&mut buf).map_err(Error::from_io)?;
        Ok(buf)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(url) => fmt::Display::fmt(url, f),
            Self::Network(url) => fmt::Display::fmt(url, f),
            Self::Git(url) => fmt::Display::fmt(url, f),
            Self::Docker(url) => fmt::Display::fmt(url, f),
            Self::Tarball(url) => fmt::Display::fmt(url, f),
            Self::Zip(url) => fmt::Display::fmt(url, f),
            Self::Internal(url) => fmt::Display::fmt(url, f),
        }
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(url) => fmt::Debug::fmt(url, f),
            Self::Network(url) => fmt::Debug::fmt(url, f),
            Self::Git(url) => fmt::Debug::fmt(url, f),
            Self::Docker(url) => fmt::Debug::fmt(url, f),
            Self::Tarball(url) => fmt::Debug::fmt(url, f),
            Self::Zip(url) => fmt::Debug::fmt(url, f),
            Self::Internal(url) => fmt::Debug::fmt(url, f),
        }
    }
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Url {}

/// Wires a variant into [`Url`]: `From`, key-based `Debug`, and (unless
/// the variant renders itself) key-based `Display`.
macro_rules! url_variant {
    ($variant:ident, $ty:ty) => {
        url_variant!(@common $variant, $ty);

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.key())
            }
        }
    };
    (@common $variant:ident, $ty:ty) => {
        impl From<$ty> for Url {
            fn from(url: $ty) -> Self {
                Url::$variant(url)
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($ty)).field(&self.key()).finish()
            }
        }
    };
}

url_variant!(@common File, FileUrl);
url_variant!(Network, NetworkUrl);
url_variant!(Git, GitUrl);
url_variant!(Docker, DockerUrl);
url_variant!(Tarball, TarballUrl);
url_variant!(Zip, ZipUrl);
url_variant!(Internal, InternalUrl);
