use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{AutotagOption, Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository};
use tokio_util::sync::CancellationToken;

use super::GitUrl;
use crate::error::{Error, Result};

const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

impl GitUrl {
    /// Fetch the ref (or the remote HEAD) into the existing clone and check
    /// it out, cloning first if needed.
    pub fn pull(&self, cancel: &CancellationToken) -> Result<()> {
        let dir = self.clone_dir(cancel)?;
        let repository = Repository::open(&dir)?;
        let refspec = self.reference.as_deref().unwrap_or("HEAD");
        tracing::debug!(repository = %self.repository, refspec, "pulling");
        self.fetch(&repository, refspec, cancel)?;
        let commit = repository.find_reference("FETCH_HEAD")?.peel_to_commit()?;
        checkout(&repository, &commit)
    }

    /// Shallow, tag-less clone into `dir`, then check out the ref if one
    /// was given.
    pub(super) fn clone_into(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(repository = %self.repository, dir = %dir.display(), "cloning");

        let repository = RepoBuilder::new()
            .fetch_options(self.fetch_options(cancel))
            .clone(&self.repository, dir)
            .map_err(|err| git_error(err, cancel))?;

        let Some(reference) = self.reference.as_deref() else {
            return Ok(());
        };

        let commit = match find_commit(&repository, reference) {
            Some(commit) => commit,
            None => {
                // Tags and non-branch refs are not part of a shallow clone.
                self.fetch(&repository, reference, cancel).map_err(|err| match err {
                    Error::Cancelled => Error::Cancelled,
                    _ => self.missing_reference(reference),
                })?;
                repository
                    .find_reference("FETCH_HEAD")
                    .and_then(|fetched| fetched.peel_to_commit())
                    .map_err(|_| self.missing_reference(reference))?
            }
        };
        checkout(&repository, &commit)
    }

    fn fetch(&self, repository: &Repository, refspec: &str, cancel: &CancellationToken) -> Result<()> {
        let mut remote = repository.find_remote("origin")?;
        remote
            .fetch(&[refspec], Some(&mut self.fetch_options(cancel)), None)
            .map_err(|err| git_error(err, cancel))
    }

    fn fetch_options(&self, cancel: &CancellationToken) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();

        let credentials = self.credentials();
        let mut attempts = 0;
        callbacks.credentials(move |_url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("authentication failed"));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
                && let Some((username, password)) = &credentials
            {
                return Cred::userpass_plaintext(username, password);
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });

        let cancel = cancel.clone();
        callbacks.transfer_progress(move |_| !cancel.is_cancelled());

        if self.accepts_invalid_certificates() {
            callbacks.certificate_check(|_, _| Ok(git2::CertificateCheckStatus::CertificateOk));
        }

        let mut options = FetchOptions::new();
        options
            .remote_callbacks(callbacks)
            .download_tags(AutotagOption::None);
        // The local transport does not support shallow fetches.
        if !self.is_local() {
            options.depth(1);
        }
        options
    }

    /// User-info credentials, else the context's credentials for the host.
    /// A token stands in for the password.
    fn credentials(&self) -> Option<(String, String)> {
        if let Some(username) = &self.username {
            return Some((username.clone(), self.password.clone().unwrap_or_default()));
        }
        let credentials = self.context.credentials(self.host()?)?;
        let secret = credentials
            .token
            .clone()
            .unwrap_or_else(|| credentials.password.clone());
        Some((credentials.username.clone(), secret))
    }

    fn accepts_invalid_certificates(&self) -> bool {
        self.host()
            .and_then(|host| self.context.transport(host))
            .is_some_and(|transport| transport.accept_invalid_certificates)
    }

    fn host(&self) -> Option<&str> {
        let rest = self.repository.split_once("://")?.1;
        let authority = rest.split('/').next()?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        Some(host.split(':').next().unwrap_or(host))
    }

    fn is_local(&self) -> bool {
        self.repository.starts_with("file://")
            || (!self.repository.contains("://") && Path::new(&self.repository).exists())
    }

    fn missing_reference(&self, reference: &str) -> Error {
        Error::not_found(format!(
            "reference {reference:?} not found in git repository: {}",
            self.repository
        ))
    }
}

/// Resolve `reference` as a branch, remote branch, tag or revision.
fn find_commit<'r>(repository: &'r Repository, reference: &str) -> Option<git2::Commit<'r>> {
    [reference.to_string(), format!("origin/{reference}")]
        .iter()
        .find_map(|name| {
            repository
                .resolve_reference_from_short_name(name)
                .ok()?
                .peel_to_commit()
                .ok()
        })
        .or_else(|| repository.revparse_single(reference).ok()?.peel_to_commit().ok())
}

fn checkout(repository: &Repository, commit: &git2::Commit<'_>) -> Result<()> {
    repository.set_head_detached(commit.id())?;
    repository.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

fn git_error(err: git2::Error, cancel: &CancellationToken) -> Error {
    if cancel.is_cancelled() {
        Error::Cancelled
    } else {
        Error::Git(err)
    }
}
