use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::archive::first_tarball_in_tarball;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::format::get_format;
use crate::paths;
use crate::pipe::{ReadStream, spawn_producer};

/// A container image in a registry: `docker://HOST/IMAGE:TAG` or
/// `docker:HOST/IMAGE:TAG`.
///
/// Opening yields the filesystem tar of the image's first layer.
#[derive(Clone)]
pub struct DockerUrl {
    url: url::Url,
    context: Arc<Context>,
}

impl DockerUrl {
    pub(crate) fn with_context(url: url::Url, context: Arc<Context>) -> Self {
        Self { url, context }
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// The image reference, `HOST/IMAGE:TAG`.
    pub fn reference(&self) -> String {
        match self.url.host_str() {
            Some(host) => match self.url.port() {
                Some(port) => format!("{host}:{port}{}", self.url.path()),
                None => format!("{host}{}", self.url.path()),
            },
            None => self.url.path().trim_start_matches('/').to_string(),
        }
    }

    /// Registry host the image is pulled from.
    pub fn registry(&self) -> String {
        match self.url.host_str() {
            Some(host) => host.to_string(),
            None => {
                let reference = self.reference();
                let first = reference.split('/').next().unwrap_or_default();
                first.split(':').next().unwrap_or_default().to_string()
            }
        }
    }

    pub fn format(&self) -> String {
        self.url
            .query_pairs()
            .find(|(name, _)| name == "format")
            .map(|(_, value)| value.into_owned())
            .filter(|format| !format.is_empty())
            .unwrap_or_else(|| get_format(self.url.path()))
    }

    pub fn base(&self) -> DockerUrl {
        let mut url = self.url.clone();
        url.set_path(&paths::base(self.url.path()));
        Self::with_context(url, self.context.clone())
    }

    pub fn relative(&self, path: &str) -> Result<DockerUrl> {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            paths::join(&paths::base(self.url.path()), path)
        };
        let mut url = self.url.clone();
        url.set_path(&joined);
        Ok(Self::with_context(url, self.context.clone()))
    }

    pub fn key(&self) -> String {
        self.url.to_string()
    }

    /// Resolve the image manifest digest without pulling anything.
    pub fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        self.check_manifest(cancel)
    }

    pub fn open(&self, cancel: &CancellationToken) -> Result<ReadStream> {
        let image = self.spawn_tarball(cancel)?;
        Ok(Box::new(first_tarball_in_tarball(Box::new(image), cancel)?))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Write the decompressed filesystem tar of the first image layer.
    pub fn write_first_layer<W: Write>(&self, writer: &mut W, cancel: &CancellationToken) -> Result<()> {
        let mut layer = self.open(cancel)?;
        std::io::copy(&mut layer, writer).map_err(Error::from_io)?;
        Ok(())
    }

    fn spawn_tarball(&self, cancel: &CancellationToken) -> Result<crate::pipe::PipeReader> {
        let image = self.clone();
        let producer_cancel = cancel.clone();
        spawn_producer("omniurl-docker-image", cancel, move |writer| {
            image.write_tarball(writer, &producer_cancel)
        })
    }
}

#[cfg(feature = "docker")]
mod registry {
    use std::io::{self, Write};
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};

    use oci_client::client::{ClientConfig, ClientProtocol};
    use oci_client::errors::OciDistributionError;
    use oci_client::manifest::OciDescriptor;
    use oci_client::secrets::RegistryAuth;
    use oci_client::{Client, Reference};
    use tokio::io::AsyncWrite;
    use tokio_util::sync::CancellationToken;

    use super::DockerUrl;
    use crate::error::{Error, Result};

    impl DockerUrl {
        /// Pull the image and write its layers as a tar stream, one
        /// `<digest>.tar.gz` (or `.tar`) entry per layer.
        pub fn write_tarball<W: Write + Send>(
            &self,
            writer: &mut W,
            cancel: &CancellationToken,
        ) -> Result<()> {
            let reference = self.parsed_reference()?;
            let client = self.client();
            let auth = self.auth();

            self.block_on(cancel, async {
                let (manifest, digest) = client
                    .pull_image_manifest(&reference, &auth)
                    .await
                    .map_err(|err| registry_error(err, &reference))?;
                tracing::debug!(image = %reference, %digest, layers = manifest.layers.len(), "pulled manifest");

                for layer in &manifest.layers {
                    write_layer(&client, &reference, layer, writer).await?;
                }
                writer.write_all(&[0; 1024]).map_err(Error::from_io)
            })
        }

        pub(super) fn check_manifest(&self, cancel: &CancellationToken) -> Result<()> {
            let reference = self.parsed_reference()?;
            let client = self.client();
            let auth = self.auth();

            self.block_on(cancel, async {
                let digest = client
                    .fetch_manifest_digest(&reference, &auth)
                    .await
                    .map_err(|err| registry_error(err, &reference))?;
                tracing::debug!(image = %reference, %digest, "image exists");
                Ok(())
            })
        }

        fn parsed_reference(&self) -> Result<Reference> {
            self.reference()
                .parse()
                .map_err(|err| Error::Malformed(format!("{}: {err}", self.url)))
        }

        fn client(&self) -> Client {
            let transport = self
                .context
                .transport(&self.registry())
                .cloned()
                .unwrap_or_default();
            Client::new(ClientConfig {
                protocol: if transport.plain_http {
                    ClientProtocol::Http
                } else {
                    ClientProtocol::Https
                },
                accept_invalid_certificates: transport.accept_invalid_certificates,
                ..Default::default()
            })
        }

        /// Basic auth from the context's credentials; a token is sent as
        /// the password.
        fn auth(&self) -> RegistryAuth {
            match self.context.credentials(&self.registry()) {
                Some(credentials) => RegistryAuth::Basic(
                    credentials.username.clone(),
                    credentials
                        .token
                        .clone()
                        .unwrap_or_else(|| credentials.password.clone()),
                ),
                None => RegistryAuth::Anonymous,
            }
        }

        /// Drive `future` on a private current-thread runtime until it
        /// completes or `cancel` fires.
        fn block_on<F>(&self, cancel: &CancellationToken, future: F) -> Result<()>
        where
            F: Future<Output = Result<()>>,
        {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                tokio::select! {
                    result = future => result,
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            })
        }
    }

    async fn write_layer<W: Write + Send>(
        client: &Client,
        reference: &Reference,
        layer: &OciDescriptor,
        writer: &mut W,
    ) -> Result<()> {
        let size = u64::try_from(layer.size).map_err(|_| {
            Error::Malformed(format!("negative layer size for {}", layer.digest))
        })?;
        let extension = if layer.media_type.contains("gzip") {
            "tar.gz"
        } else {
            "tar"
        };
        let name = format!(
            "{}.{extension}",
            layer.digest.rsplit(':').next().unwrap_or(&layer.digest)
        );

        let mut header = tar::Header::new_gnu();
        header.set_path(&name)?;
        header.set_size(size);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        writer.write_all(header.as_bytes()).map_err(Error::from_io)?;

        let mut sink = BlockingSink {
            inner: &mut *writer,
            written: 0,
        };
        client
            .pull_blob(reference, layer, &mut sink)
            .await
            .map_err(|err| registry_error(err, reference))?;
        if sink.written != size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "layer {} is {} bytes, manifest says {size}",
                    layer.digest, sink.written
                ),
            )));
        }

        let padding = (512 - size % 512) % 512;
        writer
            .write_all(&[0; 512][..padding as usize])
            .map_err(Error::from_io)
    }

    fn registry_error(err: OciDistributionError, reference: &Reference) -> Error {
        match err {
            OciDistributionError::ImageManifestNotFoundError(_) => {
                Error::not_found(format!("image not found: {reference}"))
            }
            other => Error::Registry(other),
        }
    }

    /// Adapts a blocking writer for `pull_blob`, counting bytes.
    struct BlockingSink<'a, W> {
        inner: &'a mut W,
        written: u64,
    }

    impl<W: Write> AsyncWrite for BlockingSink<'_, W> {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            let count = this.inner.write(buf)?;
            this.written += count as u64;
            Poll::Ready(Ok(count))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(self.get_mut().inner.flush())
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}

#[cfg(not(feature = "docker"))]
impl DockerUrl {
    pub fn write_tarball<W: Write + Send>(
        &self,
        _writer: &mut W,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(Error::NotImplemented("docker support is disabled".to_string()))
    }

    fn check_manifest(&self, _cancel: &CancellationToken) -> Result<()> {
        Err(Error::NotImplemented("docker support is disabled".to_string()))
    }
}

impl Context {
    pub fn new_docker_url(self: &Arc<Self>, url: url::Url) -> DockerUrl {
        DockerUrl::with_context(url, self.clone())
    }

    pub fn new_valid_docker_url(
        self: &Arc<Self>,
        url: url::Url,
        cancel: &CancellationToken,
    ) -> Result<DockerUrl> {
        let url = self.new_docker_url(url);
        url.validate(cancel)?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docker_url(raw: &str) -> DockerUrl {
        Arc::new(Context::new()).new_docker_url(url::Url::parse(raw).unwrap())
    }

    #[test]
    fn references_from_both_forms() {
        let url = docker_url("docker://registry.example.com/team/app:1.0");
        assert_eq!(url.reference(), "registry.example.com/team/app:1.0");
        assert_eq!(url.registry(), "registry.example.com");

        let url = docker_url("docker:localhost:5000/app:latest");
        assert_eq!(url.reference(), "localhost:5000/app:latest");
        assert_eq!(url.registry(), "localhost");
        assert_eq!(url.key(), "docker:localhost:5000/app:latest");
    }

    #[test]
    fn registry_ports_are_kept() {
        let url = docker_url("docker://localhost:5000/app:1");
        assert_eq!(url.reference(), "localhost:5000/app:1");
    }

    #[test]
    fn relative_replaces_the_image() {
        let url = docker_url("docker://registry.example.com/team/app:1.0");
        assert_eq!(
            url.relative("tool:2.0").unwrap().key(),
            "docker://registry.example.com/team/tool:2.0"
        );
    }
}
