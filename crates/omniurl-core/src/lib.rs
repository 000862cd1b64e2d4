//! Omniurl Core Library
//!
//! One URL type over local files, HTTP(S), git repositories, container
//! images, tar and zip archives, and in-process content. URLs are created
//! through a shared [`Context`] that owns URL rewriting, per-host
//! credentials and transports, and the cache of downloaded files and
//! clones.

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod paths;
pub mod pipe;
pub mod registry;
pub mod url;

mod resolve;

pub use context::Context;
pub use error::{Error, Result};
pub use registry::{InternalContent, InternalProvider, InternalRegistry};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Re-exports of commonly used types
pub mod prelude {
    // Context
    pub use crate::config::{ContextConfig, HostConfig};
    pub use crate::context::{Context, Credentials, Transport};

    // URLs
    pub use crate::url::{
        DockerUrl, FileUrl, GitUrl, InternalUrl, NetworkUrl, TarballUrl, Url, ZipUrl,
    };

    // Errors
    pub use crate::error::{Error, Result};

    // Content
    pub use crate::archive::{ArchiveEntry, list_entries};
    pub use crate::format::get_format;
    pub use crate::pipe::ReadStream;
    pub use crate::registry::{InternalContent, InternalProvider, InternalRegistry};

    pub use tokio_util::sync::CancellationToken;
}
