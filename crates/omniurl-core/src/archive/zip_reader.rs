use std::fs::File;
use std::io;

use tokio_util::sync::CancellationToken;

use super::{ArchiveEntry, stream_entry};
use crate::error::{Error, Result};
use crate::pipe::ReadStream;
use crate::url::{Url, ZipUrl};

/// A zip archive over a local file.
///
/// Zip needs random access, so the archive is always materialized through
/// [`Context::get_local_path`](crate::Context::get_local_path) first.
pub struct ZipReader {
    archive: zip::ZipArchive<File>,
}

impl ZipReader {
    pub fn new(file: File) -> Result<Self> {
        Ok(Self {
            archive: zip::ZipArchive::new(file)?,
        })
    }

    /// Open `url` itself as a zip archive.
    pub fn from_url(url: &Url, cancel: &CancellationToken) -> Result<Self> {
        Self::new(url.context().open_file(url, cancel)?)
    }

    /// Open the archive a zip URL points into.
    pub fn open_archive(url: &ZipUrl, cancel: &CancellationToken) -> Result<Self> {
        Self::from_url(url.archive(), cancel)
    }

    fn index_of(&self, path: &str) -> Option<usize> {
        self.archive
            .index_for_name(path)
            .or_else(|| self.archive.index_for_name(&format!("./{path}")))
    }

    pub fn has(&self, path: &str) -> bool {
        self.index_of(path).is_some()
    }

    /// Visit entries in central-directory order until `visit` returns
    /// `false`.
    pub fn iterate<F>(mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(ArchiveEntry) -> bool,
    {
        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            let entry = ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
                is_dir: file.is_dir(),
            };
            if !visit(entry) {
                break;
            }
        }
        Ok(())
    }

    /// Stream the entry named `path`, or `Ok(None)` if there is none.
    pub fn open(self, path: &str, cancel: &CancellationToken) -> Result<Option<ReadStream>> {
        let Some(index) = self.index_of(path) else {
            return Ok(None);
        };
        let mut archive = self.archive;
        stream_entry("omniurl-zip-entry", cancel, move |locator, writer| {
            let mut file = archive.by_index(index)?;
            locator.found();
            io::copy(&mut file, writer).map_err(Error::from_io)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use zip::write::SimpleFileOptions;

    use super::*;

    fn zip_file(entries: &[(&str, &[u8])]) -> File {
        let mut writer = zip::ZipWriter::new(tempfile::tempfile().unwrap());
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn opens_and_checks_entries() {
        let file = zip_file(&[("a.txt", b"alpha"), ("./dir/b.txt", b"beta")]);
        let reader = ZipReader::new(file).unwrap();
        assert!(reader.has("a.txt"));
        assert!(reader.has("dir/b.txt"));
        assert!(!reader.has("c.txt"));

        let mut entry = reader
            .open("dir/b.txt", &CancellationToken::new())
            .unwrap()
            .unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "beta");
    }

    #[test]
    fn missing_entry_is_none() {
        let reader = ZipReader::new(zip_file(&[("a.txt", b"alpha")])).unwrap();
        assert!(reader.open("b.txt", &CancellationToken::new()).unwrap().is_none());
    }

    #[test]
    fn iterate_reports_sizes() {
        let reader = ZipReader::new(zip_file(&[("a.txt", b"alpha"), ("b.txt", b"be")])).unwrap();
        let mut entries = Vec::new();
        reader
            .iterate(|entry| {
                entries.push((entry.name, entry.size));
                true
            })
            .unwrap();
        assert_eq!(entries, [("a.txt".to_string(), 5), ("b.txt".to_string(), 2)]);
    }
}
