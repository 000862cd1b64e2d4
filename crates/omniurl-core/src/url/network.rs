use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::{ReadStream, spawn_producer};

/// An `http:` or `https:` URL.
#[derive(Clone)]
pub struct NetworkUrl {
    url: url::Url,
    context: Arc<Context>,
}

impl NetworkUrl {
    pub(crate) fn with_context(url: url::Url, context: Arc<Context>) -> Self {
        Self { url, context }
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// The `format` query parameter if present, else inferred from the path.
    pub fn format(&self) -> String {
        self.url
            .query_pairs()
            .find(|(name, _)| name == "format")
            .map(|(_, value)| value.into_owned())
            .filter(|format| !format.is_empty())
            .unwrap_or_else(|| get_format(self.url.path()))
    }

    pub fn base(&self) -> NetworkUrl {
        let mut url = self.url.clone();
        url.set_path(&paths::base(self.url.path()));
        url.set_query(None);
        url.set_fragment(None);
        Self::with_context(url, self.context.clone())
    }

    /// Resolve `path` as a URL reference against this URL.
    pub fn relative(&self, path: &str) -> Result<NetworkUrl> {
        let url = self
            .url
            .join(path)
            .map_err(|err| Error::Malformed(format!("{path}: {err}")))?;
        Ok(Self::with_context(url, self.context.clone()))
    }

    pub fn key(&self) -> String {
        self.url.to_string()
    }

    /// Issue a HEAD request and require `200 OK`.
    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let client = self.context.http_client(self.host())?;
        let response = self.authorize(client.head(self.url.clone())).send()?;
        self.check_status(response).map(drop)
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(url = %self.url, "GET");
        let client = self.context.http_client(self.host())?;
        let response = self.authorize(client.get(self.url.clone())).send()?;
        let mut response = self.check_status(response)?;

        // The body is copied on its own thread so a cancelled consumer is
        // released even while the socket read is stalled.
        let reader = spawn_producer("omniurl-http-body", cancel, move |writer| {
            std::io::copy(&mut response, writer).map_err(Error::from_io)?;
            Ok(())
        })?;
        Ok(Box::new(reader))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.context.credentials(self.host()) {
            Some(credentials) => match &credentials.token {
                Some(token) => request.bearer_auth(token),
                None if !credentials.username.is_empty() => {
                    request.basic_auth(&credentials.username, Some(&credentials.password))
                }
                None => request,
            },
            None => request,
        }
    }

    fn check_status(&self, response: Response) -> Result<Response> {
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::not_found(format!("not found: {}", self.url))),
            status => Err(Error::HttpStatus {
                status: status.as_u16(),
                url: self.url.to_string(),
            }),
        }
    }
}

impl Context {
    pub fn new_network_url(self: &Arc<Self>, url: url::Url) -> NetworkUrl {
        NetworkUrl::with_context(url, self.clone())
    }

    pub fn new_valid_network_url(
        self: &Arc<Self>,
        url: url::Url,
        cancel: &CancellationToken,
    ) -> Result<NetworkUrl> {
        let url = self.new_network_url(url);
        url.validate(cancel)?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_url(raw: &str) -> NetworkUrl {
        Arc::new(Context::new()).new_network_url(url::Url::parse(raw).unwrap())
    }

    #[test]
    fn format_query_overrides_path() {
        assert_eq!(network_url("https://example.com/a.yml").format(), "yaml");
        assert_eq!(
            network_url("https://example.com/download?id=3&format=json").format(),
            "json"
        );
    }

    #[test]
    fn base_and_relative_resolve_like_references() {
        let url = network_url("https://example.com/charts/app/values.yaml?x=1");
        let base = url.base();
        assert_eq!(base.key(), "https://example.com/charts/app/");
        assert_eq!(
            base.relative("../lib/common.yaml").unwrap().key(),
            "https://example.com/charts/lib/common.yaml"
        );
        assert_eq!(
            base.relative("https://other.org/x").unwrap().key(),
            "https://other.org/x"
        );
    }

    #[test]
    fn cancelled_open_does_not_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = network_url("http://127.0.0.1:9/a").open(&cancel).err().expect("expected open to fail");
        assert!(matches!(err, Error::Cancelled));
    }
}
