use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::archive::ZipReader;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::ReadStream;

use super::Url;

/// An entry inside a zip archive, which may itself live at any URL.
#[derive(Clone)]
pub struct ZipUrl {
    path: String,
    archive: Box<Url>,
}

impl ZipUrl {
    pub fn new(path: &str, archive: Url) -> Self {
        Self {
            path: path.trim_start_matches('/').to_string(),
            archive: Box::new(archive),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn archive(&self) -> &Url {
        &self.archive
    }

    pub fn format(&self) -> String {
        get_format(&self.path)
    }

    pub fn base(&self) -> ZipUrl {
        Self::new(&paths::base(&self.path), (*self.archive).clone())
    }

    pub fn relative(&self, path: &str) -> ZipUrl {
        Self::new(&paths::join(&self.path, path), (*self.archive).clone())
    }

    pub fn key(&self) -> String {
        format!("zip:{}!/{}", self.archive.key(), self.path)
    }

    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        if ZipReader::open_archive(self, cancel)?.has(&self.path) {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        ZipReader::open_archive(self, cancel)?
            .open(&self.path, cancel)?
            .ok_or_else(|| self.not_found())
    }

    pub fn context(&self) -> &Arc<Context> {
        self.archive.context()
    }

    fn not_found(&self) -> Error {
        Error::not_found(format!(
            "path {:?} not found in archive: {}",
            self.path, self.archive
        ))
    }
}

impl Context {
    pub fn new_valid_zip_url(
        self: &Arc<Self>,
        path: &str,
        archive: Url,
        cancel: &CancellationToken,
    ) -> Result<ZipUrl> {
        let url = ZipUrl::new(path, archive);
        url.validate(cancel)?;
        Ok(url)
    }
}
