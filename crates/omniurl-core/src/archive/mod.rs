//! Archive readers for tar and zip content, plus the nested-tarball decoder.
//!
//! Readers are single-pass: every lookup scans the archive from the start,
//! so each operation consumes the reader. An entry stream keeps its
//! archive (and the archive's own stream) alive until it is dropped.

mod nested;
mod tar_reader;
mod zip_reader;

use std::io;

use crossbeam_channel::Sender;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use nested::first_tarball_in_tarball;
pub use tar_reader::TarReader;
pub use zip_reader::ZipReader;

use crate::error::{Error, Result};
use crate::pipe::{PipeWriter, ReadStream, spawn_producer};
use crate::url::Url;

/// Formats a [`TarReader`] can decode.
pub const TARBALL_FORMATS: &[&str] = &["tar", "tar.gz"];

/// One member of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Enumerate the archive behind `url`.
///
/// For tar and zip entry URLs this lists the containing archive; any other
/// URL is read as an archive itself when its format is `tar`, `tar.gz` or
/// `zip`.
pub fn list_entries(url: &Url, cancel: &CancellationToken) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let collect = |entry: ArchiveEntry| {
        entries.push(entry);
        true
    };

    match url {
        Url::Tarball(tarball) => TarReader::open_archive(tarball, cancel)?.iterate(collect)?,
        Url::Zip(zip) => ZipReader::open_archive(zip, cancel)?.iterate(collect)?,
        other => match other.format().as_str() {
            "zip" => ZipReader::from_url(other, cancel)?.iterate(collect)?,
            format if TARBALL_FORMATS.contains(&format) => {
                TarReader::new(other.open(cancel)?, format)?.iterate(collect)?
            }
            format => {
                return Err(Error::Malformed(format!(
                    "not an archive ({format:?}): {other}"
                )));
            }
        },
    }

    Ok(entries)
}

/// Entry names compare without a leading `./`.
pub(crate) fn entry_name(name: &str) -> &str {
    name.strip_prefix("./").unwrap_or(name)
}

/// Reports to [`stream_entry`] whether the producer located its entry.
pub(crate) struct Locator {
    ready: Option<Sender<Result<bool>>>,
}

impl Locator {
    pub(crate) fn found(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(true));
        }
    }
}

/// Run `locate` on a producer thread and wait until it either calls
/// [`Locator::found`] (the stream is returned), finishes without finding
/// anything (`Ok(None)`), or fails first (the error is returned).
///
/// Failures after the entry was found reach the consumer as read errors.
pub(crate) fn stream_entry<F>(
    name: &str,
    cancel: &CancellationToken,
    locate: F,
) -> Result<Option<ReadStream>>
where
    F: FnOnce(&mut Locator, &mut PipeWriter) -> Result<()> + Send + 'static,
{
    let (sender, receiver) = crossbeam_channel::bounded(1);

    let reader = spawn_producer(name, cancel, move |writer| {
        let mut locator = Locator {
            ready: Some(sender),
        };
        let result = locate(&mut locator, writer);
        match (locator.ready.take(), result) {
            (Some(ready), Ok(())) => {
                let _ = ready.send(Ok(false));
                Ok(())
            }
            (Some(ready), Err(err)) => {
                let _ = ready.send(Err(err));
                Ok(())
            }
            (None, result) => result,
        }
    })?;

    match receiver.recv() {
        Ok(Ok(true)) => Ok(Some(Box::new(reader))),
        Ok(Ok(false)) => Ok(None),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "archive reader stopped before locating the entry",
        ))),
    }
}
