//! Typed failures of a provisioning run.

use std::fmt;

use crate::cert::CertError;
use crate::daemon::DaemonConfigError;
use crate::remote::RemoteError;
use crate::types::PemRole;

/// The step of a run at which it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    GenerateCertificate,
    Probe,
    DeployCertificates,
    LoadConfig,
    ParseConfig,
    WriteConfig,
    RestartService,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisioningStep::GenerateCertificate => "generate certificate",
            ProvisioningStep::Probe => "probe",
            ProvisioningStep::DeployCertificates => "deploy certificates",
            ProvisioningStep::LoadConfig => "load daemon config",
            ProvisioningStep::ParseConfig => "parse daemon config",
            ProvisioningStep::WriteConfig => "write daemon config",
            ProvisioningStep::RestartService => "restart service",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigWriteError {
    #[error(transparent)]
    Serialize(#[from] DaemonConfigError),

    #[error(transparent)]
    Transfer(#[from] RemoteError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("{host} - unable to contact remote after {attempts} attempts")]
    HostUnreachable {
        host: String,
        attempts: u32,
        #[source]
        source: Option<RemoteError>,
    },

    #[error("{host} - certificate generation failed: {source}")]
    CertificateGenerationFailed {
        host: String,
        #[source]
        source: CertError,
    },

    #[error("{host} - failed to send {artifact} to {path}: {source}")]
    TransferFailed {
        host: String,
        artifact: PemRole,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("{host} - failed to load {path}: {source}")]
    ConfigLoadFailed {
        host: String,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("{host} - failed to parse {path}: {source}")]
    ConfigParseFailed {
        host: String,
        path: String,
        #[source]
        source: DaemonConfigError,
    },

    #[error("{host} - failed to write {path}: {source}")]
    ConfigWriteFailed {
        host: String,
        path: String,
        #[source]
        source: ConfigWriteError,
    },

    #[error("{host} - failed to start service: {source}")]
    ServiceRestartFailed {
        host: String,
        #[source]
        source: RemoteError,
    },

    #[error("{host} - provisioning cancelled before {step}")]
    Cancelled { host: String, step: ProvisioningStep },
}

impl ProvisioningError {
    pub fn host(&self) -> &str {
        match self {
            ProvisioningError::HostUnreachable { host, .. }
            | ProvisioningError::CertificateGenerationFailed { host, .. }
            | ProvisioningError::TransferFailed { host, .. }
            | ProvisioningError::ConfigLoadFailed { host, .. }
            | ProvisioningError::ConfigParseFailed { host, .. }
            | ProvisioningError::ConfigWriteFailed { host, .. }
            | ProvisioningError::ServiceRestartFailed { host, .. }
            | ProvisioningError::Cancelled { host, .. } => host,
        }
    }

    pub fn step(&self) -> ProvisioningStep {
        match self {
            ProvisioningError::HostUnreachable { .. } => ProvisioningStep::Probe,
            ProvisioningError::CertificateGenerationFailed { .. } => {
                ProvisioningStep::GenerateCertificate
            }
            ProvisioningError::TransferFailed { .. } => ProvisioningStep::DeployCertificates,
            ProvisioningError::ConfigLoadFailed { .. } => ProvisioningStep::LoadConfig,
            ProvisioningError::ConfigParseFailed { .. } => ProvisioningStep::ParseConfig,
            ProvisioningError::ConfigWriteFailed { .. } => ProvisioningStep::WriteConfig,
            ProvisioningError::ServiceRestartFailed { .. } => ProvisioningStep::RestartService,
            ProvisioningError::Cancelled { step, .. } => *step,
        }
    }
}
