//! Invocation settings: certificate directory, defaults and the optional
//! `machine.toml` file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::remote::ssh::DEFAULT_SSH_PORT;
use crate::types::HostDescriptor;

pub const DEFAULT_CERT_PATH: &str = "~/.machine";
pub const DEFAULT_ORGANIZATION: &str = "podd.org";
pub const SETTINGS_FILE: &str = "machine.toml";

/// Optional per-user defaults read from `<certpath>/machine.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub organization: Option<String>,
    pub user: Option<String>,
    pub identity: Option<PathBuf>,
    pub port: Option<u16>,
}

/// Builder inputs for a [`HostDescriptor`] assembled from flags and settings.
#[derive(Debug, Clone, Default)]
pub struct HostFlags {
    pub organization: Option<String>,
    pub user: Option<String>,
    pub identity: Option<PathBuf>,
    pub managed_daemon: bool,
}

impl Settings {
    /// Load settings from the certificate directory. A missing file yields
    /// empty settings.
    pub fn load(cert_path: &Path) -> anyhow::Result<Self> {
        let path = cert_path.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn organization_or<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.or(self.organization.as_deref())
            .unwrap_or(DEFAULT_ORGANIZATION)
    }

    pub fn user_or(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.user.clone())
    }

    pub fn identity_or(&self, flag: Option<PathBuf>) -> Option<PathBuf> {
        flag.or_else(|| self.identity.clone())
    }

    pub fn port_or(&self, flag: Option<u16>) -> u16 {
        flag.or(self.port).unwrap_or(DEFAULT_SSH_PORT)
    }

    pub fn host_descriptor(&self, cert_path: PathBuf, flags: HostFlags) -> HostDescriptor {
        let organization = self.organization_or(flags.organization.as_deref()).to_string();
        HostDescriptor::new(cert_path, organization)
            .with_user(self.user_or(flags.user))
            .with_credential(self.identity_or(flags.identity))
            .with_managed_daemon(flags.managed_daemon)
    }
}

/// Expand a bare `~` or a `~/` prefix and make the path absolute.
///
/// Other users' homes (`~name/...`) are not resolved; such paths are taken
/// literally.
pub fn expand_cert_path(raw: &str) -> anyhow::Result<PathBuf> {
    let home_relative = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
    };
    let expanded = match home_relative {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
            if rest.is_empty() { home } else { home.join(rest) }
        }
        None => PathBuf::from(raw),
    };
    std::path::absolute(&expanded)
        .with_context(|| format!("Failed to resolve certificate path: {}", expanded.display()))
}

/// Resolve the certificate path, creating it with owner-only access when
/// it does not exist yet.
pub fn prepare_cert_path(raw: &str) -> anyhow::Result<PathBuf> {
    let path = expand_cert_path(raw)?;
    if path.is_dir() {
        return Ok(path);
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(&path)
        .with_context(|| format!("Failed to create certificate directory: {}", path.display()))?;
    Ok(path)
}
