use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::archive::TarReader;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::ReadStream;

use super::Url;

/// An entry inside a tar archive, which may itself live at any URL.
#[derive(Clone)]
pub struct TarballUrl {
    path: String,
    archive: Box<Url>,
    archive_format: String,
}

impl TarballUrl {
    /// `archive_format` defaults to the archive URL's own format.
    pub fn new(path: &str, archive: Url, archive_format: Option<&str>) -> Self {
        let archive_format = archive_format
            .map(str::to_string)
            .unwrap_or_else(|| archive.format());
        Self {
            path: path.trim_start_matches('/').to_string(),
            archive: Box::new(archive),
            archive_format,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn archive(&self) -> &Url {
        &self.archive
    }

    pub fn archive_format(&self) -> &str {
        &self.archive_format
    }

    pub fn format(&self) -> String {
        get_format(&self.path)
    }

    pub fn base(&self) -> TarballUrl {
        self.with_path(paths::base(&self.path))
    }

    pub fn relative(&self, path: &str) -> TarballUrl {
        self.with_path(paths::join(&self.path, path))
    }

    pub fn key(&self) -> String {
        format!("tar:{}!/{}", self.archive.key(), self.path)
    }

    /// Scan the archive for the entry.
    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        if TarReader::open_archive(self, cancel)?.has(&self.path)? {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        TarReader::open_archive(self, cancel)?
            .open(&self.path, cancel)?
            .ok_or_else(|| self.not_found())
    }

    pub fn context(&self) -> &Arc<Context> {
        self.archive.context()
    }

    fn with_path(&self, path: String) -> TarballUrl {
        Self {
            path: path.trim_start_matches('/').to_string(),
            archive: self.archive.clone(),
            archive_format: self.archive_format.clone(),
        }
    }

    fn not_found(&self) -> Error {
        Error::not_found(format!(
            "path {:?} not found in archive: {}",
            self.path, self.archive
        ))
    }
}

impl Context {
    pub fn new_valid_tarball_url(
        self: &Arc<Self>,
        path: &str,
        archive: Url,
        archive_format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TarballUrl> {
        let url = TarballUrl::new(path, archive, archive_format);
        url.validate(cancel)?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::InternalUrl;

    #[test]
    fn keys_nest_archive_keys() {
        let archive = InternalUrl::new("bundle.tgz");
        let url = TarballUrl::new("/charts/app.yaml", archive.into(), None);
        assert_eq!(url.archive_format(), "tar.gz");
        assert_eq!(url.key(), "tar:internal:bundle.tgz!/charts/app.yaml");
        assert_eq!(url.base().key(), "tar:internal:bundle.tgz!/charts/");
        assert_eq!(
            url.base().relative("../README").key(),
            "tar:internal:bundle.tgz!/README"
        );
    }
}
