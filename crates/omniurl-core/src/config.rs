//! Context configuration loaded from `omniurl.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::context::{Context, Transport};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Where downloads and clones go; defaults to the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// URL rewrites applied before parsing.
    pub mappings: BTreeMap<String, String>,

    /// Per-host credentials and transport settings.
    pub hosts: BTreeMap<String, HostConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub plain_http: bool,
    pub accept_invalid_certificates: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl HostConfig {
    fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some() || self.token.is_some()
    }

    fn has_transport(&self) -> bool {
        self.plain_http || self.accept_invalid_certificates || self.timeout_secs.is_some()
    }

    fn transport(&self) -> Transport {
        Transport {
            plain_http: self.plain_http,
            accept_invalid_certificates: self.accept_invalid_certificates,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl ContextConfig {
    /// `<config dir>/omniurl/omniurl.toml`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dir.join("omniurl").join("omniurl.toml"))
    }

    /// Load `path`; a missing file yields the default configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn load_default() -> anyhow::Result<Self> {
        Self::load(&Self::default_path()?)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        for (host, settings) in &config.hosts {
            if host.is_empty() {
                anyhow::bail!("Host names must not be empty");
            }
            if settings.password.is_some() && settings.username.is_none() {
                anyhow::bail!("Host '{}' has a password but no username", host);
            }
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }
}

impl Context {
    /// Build a context with the configured temp dir, mappings, credentials
    /// and transports.
    pub fn from_config(config: &ContextConfig) -> anyhow::Result<Self> {
        let mut context = Context::new();
        if let Some(dir) = &config.temp_dir {
            context.set_temp_dir(dir);
        }
        for (from, to) in &config.mappings {
            context.map(from.as_str(), to.as_str());
        }
        for (host, settings) in &config.hosts {
            if settings.has_credentials() {
                context.set_credentials(
                    host.as_str(),
                    settings.username.clone().unwrap_or_default(),
                    settings.password.clone().unwrap_or_default(),
                    settings.token.clone(),
                );
            }
            if settings.has_transport() {
                context
                    .set_transport(host.as_str(), settings.transport())
                    .with_context(|| format!("Failed to configure transport for {host}"))?;
            }
        }
        Ok(context)
    }
}
