//! Certificate issuance for engine hosts.

pub mod authority;

use std::io;
use std::path::{Path, PathBuf};

use crate::types::PemBlock;

pub use authority::{BootstrapReport, FileCertificateAuthority, bootstrap, write_pem_file};

pub const CA_CERT_FILE: &str = "ca.pem";
pub const CA_KEY_FILE: &str = "ca-key.pem";
pub const CLIENT_CERT_FILE: &str = "cert.pem";
pub const CLIENT_KEY_FILE: &str = "key.pem";
pub const SERVER_CERT_FILE: &str = "server-cert.pem";
pub const SERVER_KEY_FILE: &str = "server-key.pem";

/// Permission bits for certificates and the CA, on disk and on the remote host.
pub const PUBLIC_PEM_MODE: u32 = 0o644;
/// Permission bits for private keys.
pub const PRIVATE_PEM_MODE: u32 = 0o600;

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("CA not initialized in {}; run `machine tls bootstrap` first", .0.display())]
    CaNotInitialized(PathBuf),

    #[error("CA already exists in {}", .0.display())]
    CaAlreadyExists(PathBuf),

    #[error("no subject names given for the server certificate")]
    NoSubjects,

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("certificate error: {0}")]
    Certificate(#[from] rcgen::Error),
}

impl CertError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Material for one server: the issuing CA plus the server key pair.
#[derive(Debug, Clone)]
pub struct ServerCertificate {
    pub ca: PemBlock,
    pub cert: PemBlock,
    pub key: PemBlock,
}

/// Issues server certificates signed by an organization's CA.
pub trait CertificateAuthority {
    fn generate_server_certificate(
        &self,
        cert_path: &Path,
        organization: &str,
        subjects: &[String],
    ) -> Result<ServerCertificate, CertError>;
}
