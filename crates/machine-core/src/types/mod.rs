//! Shared domain types for provisioning runs.

use std::fmt;
use std::path::{Path, PathBuf};

/// Per-invocation description of how to reach and certify a host.
///
/// Built once by the caller and passed by reference into the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    cert_path: PathBuf,
    organization: String,
    user: Option<String>,
    credential: Option<PathBuf>,
    managed_daemon: bool,
}

impl HostDescriptor {
    pub fn new(cert_path: impl Into<PathBuf>, organization: impl Into<String>) -> Self {
        Self {
            cert_path: cert_path.into(),
            organization: organization.into(),
            user: None,
            credential: None,
            managed_daemon: false,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self
    }

    pub fn with_credential(mut self, credential: Option<PathBuf>) -> Self {
        self.credential = credential.filter(|c| !c.as_os_str().is_empty());
        self
    }

    pub fn with_managed_daemon(mut self, managed: bool) -> Self {
        self.managed_daemon = managed;
        self
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Private key used to authenticate the remote session.
    pub fn credential(&self) -> Option<&Path> {
        self.credential.as_deref()
    }

    pub fn is_managed_daemon(&self) -> bool {
        self.managed_daemon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PemRole {
    Ca,
    Certificate,
    Key,
}

impl fmt::Display for PemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PemRole::Ca => "CA",
            PemRole::Certificate => "certificate",
            PemRole::Key => "key",
        };
        f.write_str(label)
    }
}

/// A named PEM artifact. The name doubles as the remote file name.
#[derive(Clone, PartialEq, Eq)]
pub struct PemBlock {
    name: String,
    contents: Vec<u8>,
    role: PemRole,
}

impl PemBlock {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>, role: PemRole) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            role,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn role(&self) -> PemRole {
        self.role
    }
}

// Key material stays out of debug output.
impl fmt::Debug for PemBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemBlock")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// Subject alternative names requested for a server certificate.
///
/// Always starts with the target host, `localhost` and `127.0.0.1`, followed
/// by caller-supplied names in order. Duplicates are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectNames(Vec<String>);

impl SubjectNames {
    pub const FIXED: [&'static str; 2] = ["localhost", "127.0.0.1"];

    pub fn for_host<S: AsRef<str>>(host: &str, alternate_names: &[S]) -> Self {
        let mut names = Vec::with_capacity(Self::FIXED.len() + 1 + alternate_names.len());
        names.push(host.to_string());
        names.extend(Self::FIXED.iter().map(|name| name.to_string()));
        names.extend(alternate_names.iter().map(|name| name.as_ref().to_string()));
        Self(names)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for SubjectNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}
