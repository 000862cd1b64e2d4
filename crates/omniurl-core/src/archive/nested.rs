use std::io;

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pipe::{PipeReader, ReadStream, spawn_producer};

/// Stream the decompressed content of the first regular `*.tar.gz` entry
/// of the tar stream `outer`.
///
/// Decoding happens on a producer thread; an outer archive without such an
/// entry surfaces as a not-found read error.
pub fn first_tarball_in_tarball(outer: ReadStream, cancel: &CancellationToken) -> Result<PipeReader> {
    spawn_producer("omniurl-nested-tarball", cancel, move |writer| {
        let mut archive = tar::Archive::new(outer);
        for entry in archive.entries().map_err(Error::from_io)? {
            let entry = entry.map_err(Error::from_io)?;
            let is_tarball = entry.header().entry_type().is_file()
                && entry.path_bytes().ends_with(b".tar.gz");
            if is_tarball {
                tracing::debug!(
                    entry = %String::from_utf8_lossy(&entry.path_bytes()),
                    "decoding nested tarball"
                );
                io::copy(&mut GzDecoder::new(entry), writer).map_err(Error::from_io)?;
                return Ok(());
            }
        }
        Err(Error::not_found("\"*.tar.gz\" entry not found in tarball"))
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    #[test]
    fn decodes_first_gzipped_member() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"inner layer bytes").unwrap();
        let layer = encoder.finish().unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "manifest.json", b"[]");
        append(&mut builder, "sha256-1.tar.gz", &layer);
        append(&mut builder, "sha256-2.tar.gz", b"not reached");
        let outer = builder.into_inner().unwrap();

        let mut reader =
            first_tarball_in_tarball(Box::new(Cursor::new(outer)), &CancellationToken::new())
                .unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "inner layer bytes");
    }

    #[test]
    fn missing_member_is_not_found() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "manifest.json", b"[]");
        let outer = builder.into_inner().unwrap();

        let mut reader =
            first_tarball_in_tarball(Box::new(Cursor::new(outer)), &CancellationToken::new())
                .unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(Error::from_io(err).is_not_found());
    }
}
