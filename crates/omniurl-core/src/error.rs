//! Error taxonomy shared by every URL variant.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The addressed path does not exist inside its container.
    #[error("{0}")]
    NotFound(String),

    /// Support for a scheme was left out of this build.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Unparseable URL string or archive grammar violation.
    #[error("malformed URL: {0}")]
    Malformed(String),

    #[error("unsupported URL format: {0}")]
    UnsupportedScheme(String),

    /// Every origin rejected a relative path.
    ///
    /// `reasons` keeps one message per origin tried, in order.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String, reasons: Vec<String> },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal URL conflict: {0}")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "git")]
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[cfg(feature = "docker")]
    #[error("registry: {0}")]
    Registry(#[from] oci_client::errors::OciDistributionError),
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }

    /// Recovers an [`Error`] that travelled through a pipe inside an
    /// [`io::Error`]; any other I/O error is wrapped as [`Error::Io`].
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::other(other)),
            None => Self::Io(io::Error::from(io::ErrorKind::Other)),
        }
    }

    /// Wraps this error for transport through an [`io::Read`] boundary.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => {
                // Never `Interrupted`: std read loops retry on it.
                let kind = if other.is_not_found() {
                    io::ErrorKind::NotFound
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, other)
            }
        }
    }
}
