//! Turning strings into URLs.
//!
//! Parsing dispatches on the scheme. A string that is not an absolute URL
//! is a file path. Validating resolution also tries relative paths against
//! a list of origins, in order.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::url::{TarballUrl, Url, ZipUrl};

/// A parsed input: either a URL with a known scheme or a file path.
enum Parsed {
    File(String),
    Url { scheme: String, parsed: url::Url },
}

fn classify(input: &str) -> Result<Parsed> {
    match url::Url::parse(input) {
        Ok(parsed) if parsed.scheme() == "file" => Ok(Parsed::File(file_url_path(input, &parsed)?)),
        Ok(parsed) => Ok(Parsed::Url {
            scheme: parsed.scheme().to_string(),
            parsed,
        }),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Parsed::File(input.to_string())),
        Err(err) => Err(Error::Malformed(format!("{input}: {err}"))),
    }
}

/// The OS path of a `file:` URL. `file:rel/path` (no slash after the
/// colon) is a relative path, matching the key of a relative file URL.
fn file_url_path(input: &str, parsed: &url::Url) -> Result<String> {
    let rest = input.get("file:".len()..).unwrap_or_default();
    if !rest.starts_with('/') {
        return Ok(rest.to_string());
    }
    let path = parsed
        .to_file_path()
        .map_err(|()| Error::Malformed(format!("not a local file URL: {input}")))?;
    let mut path = path.to_string_lossy().into_owned();
    if parsed.path().ends_with('/') && !path.ends_with(std::path::MAIN_SEPARATOR) {
        path.push('/');
    }
    Ok(path)
}

/// Split `SCHEME:ARCHIVE!/PATH` on its last `!`, so the archive half may
/// itself be an archive URL.
fn split_archive_url<'a>(scheme: &str, input: &'a str) -> Result<(&'a str, &'a str)> {
    input
        .get(scheme.len() + 1..)
        .and_then(|rest| rest.rsplit_once('!'))
        .filter(|(archive, _)| !archive.is_empty())
        .ok_or_else(|| Error::Malformed(format!("malformed {scheme:?} URL: {input}")))
}

impl Context {
    /// Parse `input` into a URL without checking that it exists.
    ///
    /// The mapping table and transformers are applied first.
    pub fn new_url(self: &Arc<Self>, input: &str) -> Result<Url> {
        let input = self.transform(input).unwrap_or_else(|| input.to_string());
        self.parse_url(&input)
    }

    /// Like [`new_url`](Context::new_url), falling back to a file URL for
    /// input that does not parse (e.g. `C:\dir\file`).
    pub fn new_any_or_file_url(self: &Arc<Self>, input: &str) -> Url {
        self.new_url(input)
            .unwrap_or_else(|_| self.new_file_url(input).into())
    }

    /// Resolve `input` to a URL that exists.
    ///
    /// Absolute URLs and absolute file paths are validated directly. Other
    /// input is tried against each origin in order and the first valid
    /// result wins; a `file:` input only considers file origins. When
    /// every origin fails the error is [`Error::InvalidUrl`], carrying one
    /// reason per origin.
    pub fn new_valid_url(
        self: &Arc<Self>,
        input: &str,
        origins: &[Url],
        cancel: &CancellationToken,
    ) -> Result<Url> {
        let input = self.transform(input).unwrap_or_else(|| input.to_string());

        match classify(&input) {
            Ok(Parsed::File(path)) => {
                let only_files = input.starts_with("file:");
                self.new_valid_relative_url(&path, origins, only_files, cancel)
            }
            Ok(Parsed::Url { .. }) => {
                let url = self.parse_url(&input)?;
                url.validate(cancel)?;
                Ok(url)
            }
            // Not a URL at all, so possibly a relative path.
            Err(_) => self.new_valid_relative_url(&input, origins, false, cancel),
        }
    }

    /// Like [`new_valid_url`](Context::new_valid_url), falling back to an
    /// existing file for input that does not resolve as a URL.
    pub fn new_valid_any_or_file_url(
        self: &Arc<Self>,
        input: &str,
        origins: &[Url],
        cancel: &CancellationToken,
    ) -> Result<Url> {
        match self.new_valid_url(input, origins, cancel) {
            Ok(url) => Ok(url),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => match self.new_valid_file_url(input) {
                Ok(file) => Ok(file.into()),
                // Scheme errors say nothing useful about a file path.
                Err(file_err) if matches!(err, Error::UnsupportedScheme(_) | Error::Malformed(_)) => {
                    Err(file_err)
                }
                Err(_) => Err(err),
            },
        }
    }

    fn parse_url(self: &Arc<Self>, input: &str) -> Result<Url> {
        let (scheme, parsed) = match classify(input)? {
            Parsed::File(path) => return Ok(self.new_file_url(path).into()),
            Parsed::Url { scheme, parsed } => (scheme, parsed),
        };

        match scheme.as_str() {
            "http" | "https" => Ok(self.new_network_url(parsed).into()),
            "tar" => {
                let (archive, path) = split_archive_url("tar", input)?;
                let archive = self.new_any_or_file_url(archive);
                Ok(TarballUrl::new(path, archive, None).into())
            }
            "zip" => {
                let (archive, path) = split_archive_url("zip", input)?;
                let archive = self.new_any_or_file_url(archive);
                Ok(ZipUrl::new(path, archive).into())
            }
            "git" => {
                let (repository, path) = split_archive_url("git", input)?;
                Ok(self.new_git_url(repository, path).into())
            }
            "docker" => Ok(self.new_docker_url(parsed).into()),
            "internal" => {
                let path = input.get("internal:".len()..).unwrap_or_default();
                Ok(self.new_internal_url(path).into())
            }
            _ => Err(Error::UnsupportedScheme(input.to_string())),
        }
    }

    fn new_valid_relative_url(
        self: &Arc<Self>,
        path: &str,
        origins: &[Url],
        only_files: bool,
        cancel: &CancellationToken,
    ) -> Result<Url> {
        if Path::new(path).is_absolute() {
            return Ok(self.new_valid_file_url(path)?.into());
        }

        let mut reasons = Vec::new();
        for origin in origins {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if only_files && !matches!(origin, Url::File(_)) {
                continue;
            }
            match origin.valid_relative(path, cancel) {
                Ok(url) => {
                    tracing::debug!(%path, %origin, %url, "resolved relative URL");
                    return Ok(url);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::debug!(%path, %origin, error = %err, "origin rejected relative URL");
                    reasons.push(format!("{origin}: {err}"));
                }
            }
        }

        Err(Error::InvalidUrl {
            url: path.to_string(),
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_urls_split_on_the_last_bang() {
        assert_eq!(
            split_archive_url("zip", "zip:tar:a.tar!/b.zip!/c.txt").unwrap(),
            ("tar:a.tar!/b.zip", "/c.txt")
        );
        assert!(split_archive_url("tar", "tar:a.tar").is_err());
        assert!(split_archive_url("tar", "tar:!/x").is_err());
    }

    #[test]
    fn relative_file_urls_keep_their_path() {
        match classify("file:dir/a.yaml").unwrap() {
            Parsed::File(path) => assert_eq!(path, "dir/a.yaml"),
            Parsed::Url { .. } => panic!("expected a file path"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn absolute_file_urls_become_paths() {
        match classify("file:///srv/a%20b/").unwrap() {
            Parsed::File(path) => assert_eq!(path, "/srv/a b/"),
            Parsed::Url { .. } => panic!("expected a file path"),
        }
    }

    #[test]
    fn bare_paths_are_files() {
        assert!(matches!(classify("charts/a.yaml").unwrap(), Parsed::File(_)));
        assert!(matches!(classify("/abs/a.yaml").unwrap(), Parsed::File(_)));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        let context = Arc::new(Context::new());
        let err = context.new_url("gopher://example.com/x").unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(_)));
        assert!(matches!(
            context.new_any_or_file_url("gopher://example.com/x"),
            Url::File(_)
        ));
    }

    #[test]
    fn mappings_apply_before_parsing() {
        let context = Arc::new(Context::new());
        context.map("https://example.com/a.yaml", "internal:mirror/a.yaml");
        let url = context.new_url("https://example.com/a.yaml").unwrap();
        assert_eq!(url.key(), "internal:mirror/a.yaml");
    }

    #[test]
    fn nested_archive_urls_parse() {
        let context = Arc::new(Context::new());
        let url = context
            .new_url("zip:tar:internal:outer.tar!/inner.zip!/dir/c.txt")
            .unwrap();
        let Url::Zip(zip) = &url else {
            panic!("expected a zip URL, got {url:?}");
        };
        assert_eq!(zip.path(), "dir/c.txt");
        assert_eq!(zip.archive().key(), "tar:internal:outer.tar!/inner.zip");
        assert_eq!(url.key(), "zip:tar:internal:outer.tar!/inner.zip!/dir/c.txt");
    }
}
