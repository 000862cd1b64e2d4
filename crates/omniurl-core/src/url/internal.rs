use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::{CancellableReader, ReadStream};
use crate::registry::InternalContent;

use super::Url;

/// A path in the context's [`InternalRegistry`](crate::InternalRegistry).
#[derive(Clone)]
pub struct InternalUrl {
    path: String,
    content: Option<InternalContent>,
    context: Arc<Context>,
}

impl InternalUrl {
    /// An internal URL bound to a fresh, default context.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_context(path, Arc::new(Context::new()))
    }

    pub(crate) fn with_context(path: impl Into<String>, context: Arc<Context>) -> Self {
        Self {
            path: path.into(),
            content: None,
            context,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Serve `content` from this value instead of the registry.
    pub fn set_content(&mut self, content: impl Into<InternalContent>) {
        self.content = Some(content.into());
    }

    pub fn format(&self) -> String {
        get_format(&self.path)
    }

    pub fn base(&self) -> InternalUrl {
        Self::with_context(paths::base(&self.path), self.context.clone())
    }

    pub fn relative(&self, path: &str) -> InternalUrl {
        Self::with_context(paths::join(&self.path, path), self.context.clone())
    }

    pub fn key(&self) -> String {
        format!("internal:{}", self.path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.is_some() || self.context.registry().contains(&self.path) {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        let content = match &self.content {
            Some(content) => content.clone(),
            None => self
                .context
                .registry()
                .load(&self.path)
                .ok_or_else(|| self.not_found())?,
        };
        content.open(&self.path, cancel)
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn not_found(&self) -> Error {
        Error::not_found(format!("internal URL not found: {}", self.path))
    }
}

impl Context {
    pub fn new_internal_url(self: &Arc<Self>, path: impl Into<String>) -> InternalUrl {
        InternalUrl::with_context(path, self.clone())
    }

    pub fn new_valid_internal_url(self: &Arc<Self>, path: impl Into<String>) -> Result<InternalUrl> {
        let url = self.new_internal_url(path);
        url.validate()?;
        Ok(url)
    }

    /// Buffer `reader` into the registry under `path` and return its URL.
    /// Fails if `path` is already registered.
    pub fn read_to_internal_url(self: &Arc<Self>, path: &str, mut reader: impl Read) -> Result<Url> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content).map_err(Error::from_io)?;
        self.registry().register(path, content)?;
        Ok(self.new_valid_internal_url(path)?.into())
    }

    /// Buffer standard input under a fresh `<stdin:ID>` path, suffixed with
    /// `.format` when a format is given.
    pub fn read_stdin_to_internal_url(
        self: &Arc<Self>,
        format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Url> {
        let mut path = format!("<stdin:{}>", unique_id());
        if let Some(format) = format.filter(|format| !format.is_empty()) {
            path = format!("{path}.{format}");
        }
        let stdin = CancellableReader::new(std::io::stdin().lock(), cancel);
        self.read_to_internal_url(&path, stdin)
    }
}

fn unique_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.finalize().to_hex()[..20].to_string()
}
