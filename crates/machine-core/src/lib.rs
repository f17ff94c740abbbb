//! Machine Core Library
//!
//! Provides the domain logic for bootstrapping mutual-TLS on remote
//! container-engine hosts: certificate issuance, remote command execution,
//! daemon configuration patching and the provisioning workflow tying them
//! together.

pub mod cert;
pub mod daemon;
pub mod exec;
pub mod provision;
pub mod remote;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Domain types
    pub use crate::types::{HostDescriptor, PemBlock, PemRole, SubjectNames};

    // Certificates
    pub use crate::cert::{
        CertError, CertificateAuthority, FileCertificateAuthority, ServerCertificate,
    };

    // Remote access
    pub use crate::remote::ssh::{SshConfig, SshConnector, SshExecutor};
    pub use crate::remote::{CommandOutput, Connector, RemoteError, RemoteExecutor};

    // Daemon configuration
    pub use crate::daemon::{DaemonConfig, DaemonConfigError};

    // Provisioning
    pub use crate::provision::{
        CancelToken, ProvisioningError, ProvisioningOrchestrator, ProvisioningStep, RetryPolicy,
        RunState, Sleeper, ThreadSleeper,
    };
}
