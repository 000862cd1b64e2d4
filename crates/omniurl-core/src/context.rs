//! Resolution context: URL rewriting, per-host configuration, and the cache
//! of locally materialized resources.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::paths::{delete_temporary_dir, delete_temporary_file, temporary_prefix};
use crate::registry::InternalRegistry;
use crate::url::Url;

const USER_AGENT: &str = concat!("omniurl/", env!("CARGO_PKG_VERSION"));

/// Rewrites a URL string before resolution; `None` means "no opinion".
pub type Transformer = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Static credentials for one host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport settings for one host, honored by every variant that talks to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    /// Speak plain HTTP to container registries on this host.
    pub plain_http: bool,
    pub accept_invalid_certificates: bool,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct CacheState {
    mappings: HashMap<String, String>,
    files: HashMap<String, PathBuf>,
    dirs: HashMap<String, PathBuf>,
}

/// Shared state behind every URL value.
///
/// Per-host settings and transformers are configured through `&mut self`
/// before the context is wrapped in an [`Arc`] and shared; only the mapping
/// table and the materialization caches change afterwards, all guarded by
/// one re-entrant lock.
pub struct Context {
    transformers: Vec<Transformer>,
    state: ReentrantMutex<RefCell<CacheState>>,
    http_clients: HashMap<String, reqwest::blocking::Client>,
    transports: HashMap<String, Transport>,
    credentials: HashMap<String, Credentials>,
    default_client: OnceLock<reqwest::blocking::Client>,
    registry: Arc<InternalRegistry>,
    temp_dir: Option<PathBuf>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create an empty context with its own internal registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(InternalRegistry::new()))
    }

    /// Create an empty context that resolves `internal:` URLs in `registry`.
    pub fn with_registry(registry: Arc<InternalRegistry>) -> Self {
        Self {
            transformers: Vec::new(),
            state: ReentrantMutex::new(RefCell::new(CacheState::default())),
            http_clients: HashMap::new(),
            transports: HashMap::new(),
            credentials: HashMap::new(),
            default_client: OnceLock::new(),
            registry,
            temp_dir: None,
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn registry(&self) -> &Arc<InternalRegistry> {
        &self.registry
    }

    /// Directory for downloads and clones (defaults to the OS temp dir).
    pub fn set_temp_dir(&mut self, dir: impl Into<PathBuf>) {
        self.temp_dir = Some(dir.into());
    }

    pub fn temp_dir(&self) -> Result<PathBuf> {
        match &self.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(dir.clone())
            }
            None => Ok(std::env::temp_dir()),
        }
    }

    // Rewriting

    /// Register a transformer, consulted after the mapping table and after
    /// previously registered transformers.
    pub fn add_transformer<F>(&mut self, transformer: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.transformers.push(Arc::new(transformer));
    }

    /// Map `from` to `to`; an empty `to` deletes the mapping.
    pub fn map(&self, from: impl Into<String>, to: impl Into<String>) {
        let (from, to) = (from.into(), to.into());
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if to.is_empty() {
            state.mappings.remove(&from);
        } else {
            state.mappings.insert(from, to);
        }
    }

    pub fn get_mapping(&self, from: &str) -> Option<String> {
        let guard = self.state.lock();
        let mapping = guard.borrow().mappings.get(from).cloned();
        mapping
    }

    /// Apply the mapping table, then each transformer, returning the first
    /// rewrite.
    pub fn transform(&self, from: &str) -> Option<String> {
        self.get_mapping(from)
            .or_else(|| self.transformers.iter().find_map(|transformer| transformer(from)))
    }

    // Per-host configuration

    /// Use `client` for every network request to `host`.
    pub fn set_http_client(&mut self, host: impl Into<String>, client: reqwest::blocking::Client) {
        self.http_clients.insert(host.into(), client);
    }

    /// Apply transport settings to `host`, building a matching HTTP client.
    pub fn set_transport(&mut self, host: impl Into<String>, transport: Transport) -> Result<()> {
        let host = host.into();
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(transport.accept_invalid_certificates)
            .timeout(transport.timeout)
            .build()?;
        self.http_clients.insert(host.clone(), client);
        self.transports.insert(host, transport);
        Ok(())
    }

    pub fn transport(&self, host: &str) -> Option<&Transport> {
        self.transports.get(host)
    }

    pub fn set_credentials(
        &mut self,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        token: Option<String>,
    ) {
        self.credentials.insert(
            host.into(),
            Credentials {
                username: username.into(),
                password: password.into(),
                token,
            },
        );
    }

    pub fn credentials(&self, host: &str) -> Option<&Credentials> {
        self.credentials.get(host)
    }

    /// The HTTP client for `host`: its override if set, else a shared default.
    pub fn http_client(&self, host: &str) -> Result<reqwest::blocking::Client> {
        if let Some(client) = self.http_clients.get(host) {
            return Ok(client.clone());
        }
        if let Some(client) = self.default_client.get() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(self.default_client.get_or_init(|| client).clone())
    }

    // Materialization

    /// Open `url` as a local file, downloading it first if needed.
    pub fn open_file(&self, url: &Url, cancel: &CancellationToken) -> Result<File> {
        let path = self.get_local_path(url, cancel)?;
        File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::not_found(format!("file not found: {}", path.display())),
            _ => Error::Io(err),
        })
    }

    /// A local path holding the content of `url`.
    ///
    /// File URLs are returned as they are. Anything else is downloaded once
    /// into a temporary file and served from the cache until [`release`]
    /// (or until the file disappears, in which case it is downloaded again).
    /// The cache lock is held for the whole download.
    ///
    /// [`release`]: Context::release
    pub fn get_local_path(&self, url: &Url, cancel: &CancellationToken) -> Result<PathBuf> {
        if let Url::File(file) = url {
            return Ok(file.path().to_path_buf());
        }

        let key = url.key();
        let guard = self.state.lock();

        let cached = guard.borrow().files.get(&key).cloned();
        if let Some(path) = cached {
            if path.try_exists()? {
                tracing::debug!(%key, path = %path.display(), "local path cache hit");
                return Ok(path);
            }
            tracing::warn!(%key, path = %path.display(), "cached file vanished, downloading again");
            guard.borrow_mut().files.remove(&key);
        }

        let path = self.download(url, cancel)?;
        guard.borrow_mut().files.insert(key, path.clone());
        Ok(path)
    }

    /// Copy the content of `url` into a new temporary file that is not
    /// tracked by the cache.
    pub fn download(&self, url: &Url, cancel: &CancellationToken) -> Result<PathBuf> {
        let key = url.key();
        let format = url.format();
        let suffix = if format.is_empty() {
            String::new()
        } else {
            format!(".{format}")
        };

        tracing::debug!(%key, "downloading");
        let mut file = tempfile::Builder::new()
            .prefix(&temporary_prefix(&key))
            .suffix(&suffix)
            .tempfile_in(self.temp_dir()?)?;

        let mut reader = url.open(cancel)?;
        io::copy(&mut reader, file.as_file_mut()).map_err(Error::from_io)?;

        let (_, path) = file.keep().map_err(|err| Error::Io(err.error))?;
        tracing::debug!(%key, path = %path.display(), "downloaded");
        Ok(path)
    }

    /// Materialize a directory for `key`, reusing an earlier one that still
    /// exists. `materialize` fills a fresh temporary directory; on failure
    /// the directory is removed. The cache lock is held throughout.
    pub(crate) fn materialize_dir<F>(&self, key: &str, materialize: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let guard = self.state.lock();

        let cached = guard.borrow().dirs.get(key).cloned();
        if let Some(dir) = cached {
            if dir.is_dir() {
                tracing::debug!(%key, dir = %dir.display(), "directory cache hit");
                return Ok(dir);
            }
            tracing::warn!(%key, dir = %dir.display(), "cached directory vanished");
            guard.borrow_mut().dirs.remove(key);
        }

        let dir = tempfile::Builder::new()
            .prefix(&temporary_prefix(key))
            .keep(true)
            .tempdir_in(self.temp_dir()?)?
            .path()
            .to_path_buf();

        if let Err(err) = materialize(&dir) {
            let _ = delete_temporary_dir(&dir);
            return Err(err);
        }

        guard.borrow_mut().dirs.insert(key.to_string(), dir.clone());
        Ok(dir)
    }

    /// The directory previously materialized for `key`, if any.
    pub fn cached_dir(&self, key: &str) -> Option<PathBuf> {
        let guard = self.state.lock();
        let dir = guard.borrow().dirs.get(key).cloned();
        dir
    }

    /// Delete every cached temporary file and directory and clear the
    /// cache. Missing files are not an error; the last deletion failure is
    /// returned after all deletions were attempted.
    pub fn release(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let mut result = Ok(());

        for (_, path) in state.files.drain() {
            if let Err(err) = delete_temporary_file(&path) {
                result = Err(Error::Io(err));
            }
        }
        for (_, path) in state.dirs.drain() {
            if let Err(err) = delete_temporary_dir(&path) {
                result = Err(Error::Io(err));
            }
        }

        result
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Context");
        if let Some(guard) = self.state.try_lock() {
            if let Ok(state) = guard.try_borrow() {
                debug
                    .field("mappings", &state.mappings.len())
                    .field("files", &state.files.len())
                    .field("dirs", &state.dirs.len());
            }
        }
        debug
            .field("transformers", &self.transformers.len())
            .field("hosts", &self.http_clients.keys().collect::<Vec<_>>())
            .field("credentials", &self.credentials)
            .field("temp_dir", &self.temp_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mapping_deletes() {
        let context = Context::new();
        context.map("a", "b");
        assert_eq!(context.get_mapping("a").as_deref(), Some("b"));
        context.map("a", "");
        assert_eq!(context.get_mapping("a"), None);
    }

    #[test]
    fn mapping_table_wins_over_transformers() {
        let mut context = Context::new();
        context.add_transformer(|url| url.strip_prefix("mirror:").map(|rest| format!("/srv/{rest}")));
        context.add_transformer(|_| Some("fallback".to_string()));
        context.map("mirror:a", "/mapped/a");

        assert_eq!(context.transform("mirror:a").as_deref(), Some("/mapped/a"));
        assert_eq!(context.transform("mirror:b").as_deref(), Some("/srv/b"));
        assert_eq!(context.transform("other").as_deref(), Some("fallback"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let mut context = Context::new();
        context.set_credentials("example.com", "me", "secret", Some("tok".to_string()));
        let rendered = format!("{:?}", context.credentials("example.com").unwrap());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("tok\""));
    }

    #[test]
    fn materialize_dir_reuses_and_heals() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut context = Context::new();
        context.set_temp_dir(temp.path());

        let mut runs = 0;
        let first = context
            .materialize_dir("repo", |dir| {
                runs += 1;
                std::fs::write(dir.join("marker"), "x")?;
                Ok(())
            })
            .unwrap();
        let second = context.materialize_dir("repo", |_| unreachable!()).unwrap();
        assert_eq!(first, second);
        assert_eq!(runs, 1);

        std::fs::remove_dir_all(&first).unwrap();
        let healed = context.materialize_dir("repo", |_| Ok(())).unwrap();
        assert_ne!(healed, first);
        assert!(healed.is_dir());

        context.release().unwrap();
        assert!(!healed.exists());
        assert!(context.cached_dir("repo").is_none());
    }

    #[test]
    fn failed_materialization_leaves_nothing_behind() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut context = Context::new();
        context.set_temp_dir(temp.path());

        let err = context
            .materialize_dir("repo", |_| Err(Error::not_found("missing ref")))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(context.cached_dir("repo").is_none());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
