use std::io;

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use super::{ArchiveEntry, entry_name, stream_entry};
use crate::error::{Error, Result};
use crate::pipe::ReadStream;
use crate::url::TarballUrl;

/// A tar archive over an owned byte stream, optionally gzip-compressed.
pub struct TarReader {
    archive: tar::Archive<ReadStream>,
}

impl TarReader {
    /// Wrap `stream`, decoding it according to `format` (`tar` or `tar.gz`).
    pub fn new(stream: ReadStream, format: &str) -> Result<Self> {
        let stream: ReadStream = match format {
            "tar" => stream,
            "tar.gz" => Box::new(GzDecoder::new(stream)),
            other => {
                return Err(Error::Malformed(format!(
                    "unsupported tarball archive format: {other:?}"
                )));
            }
        };
        Ok(Self {
            archive: tar::Archive::new(stream),
        })
    }

    /// Open the archive a tarball URL points into.
    pub fn open_archive(url: &TarballUrl, cancel: &CancellationToken) -> Result<Self> {
        // Reject the format before opening (and possibly downloading) anything.
        if !super::TARBALL_FORMATS.contains(&url.archive_format()) {
            return Err(Error::Malformed(format!(
                "unsupported tarball archive format: {:?}",
                url.archive_format()
            )));
        }
        Self::new(url.archive().open(cancel)?, url.archive_format())
    }

    pub fn has(self, path: &str) -> Result<bool> {
        let mut found = false;
        self.iterate(|entry| {
            found = entry_name(&entry.name) == path;
            !found
        })?;
        Ok(found)
    }

    /// Visit entries in stream order until `visit` returns `false`.
    pub fn iterate<F>(mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(ArchiveEntry) -> bool,
    {
        for entry in self.archive.entries().map_err(Error::from_io)? {
            let entry = entry.map_err(Error::from_io)?;
            let header = entry.header();
            let archive_entry = ArchiveEntry {
                name: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
                size: entry.size(),
                is_dir: header.entry_type().is_dir(),
            };
            if !visit(archive_entry) {
                break;
            }
        }
        Ok(())
    }

    /// Stream the first entry named `path`, or `Ok(None)` if the archive has
    /// no such entry.
    pub fn open(self, path: &str, cancel: &CancellationToken) -> Result<Option<ReadStream>> {
        let path = path.to_string();
        let mut archive = self.archive;
        stream_entry("omniurl-tar-entry", cancel, move |locator, writer| {
            for entry in archive.entries().map_err(Error::from_io)? {
                let mut entry = entry.map_err(Error::from_io)?;
                let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                if entry_name(&name) == path {
                    locator.found();
                    io::copy(&mut entry, writer).map_err(Error::from_io)?;
                    return Ok(());
                }
            }
            Ok(())
        })
    }
}
