//! End-to-end TLS bootstrap of a container-engine host.

use std::fmt;

use crate::cert::{CertificateAuthority, PRIVATE_PEM_MODE, PUBLIC_PEM_MODE, ServerCertificate};
use crate::daemon::{
    DAEMON_CONFIG_MODE, DAEMON_CONFIG_PATH, DaemonConfig, TLS_BIND_ADDRESS, remote_cert_path,
};
use crate::remote::{Connector, RemoteExecutor};
use crate::types::{HostDescriptor, PemRole, SubjectNames};

use super::error::{ConfigWriteError, ProvisioningError, ProvisioningStep};
use super::wait::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper, WaitError, wait_until_ready};

/// Side-effect-free command used to check that the host accepts commands.
pub const PROBE_COMMAND: &str = "date";
pub const STOP_COMMAND: &str = "service docker stop";
pub const START_COMMAND: &str = "service docker start";

static THREAD_SLEEPER: ThreadSleeper = ThreadSleeper;

/// Progress of a single run. A retried run always starts again at `Unprobed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Unprobed,
    Reachable,
    CertificatesDeployed,
    ConfigPatched,
    ServiceRestarted,
    Done,
    Failed(ProvisioningStep),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Unprobed => f.write_str("unprobed"),
            RunState::Reachable => f.write_str("reachable"),
            RunState::CertificatesDeployed => f.write_str("certificates deployed"),
            RunState::ConfigPatched => f.write_str("daemon configured"),
            RunState::ServiceRestarted => f.write_str("service restarted"),
            RunState::Done => f.write_str("done"),
            RunState::Failed(step) => write!(f, "failed to {}", step),
        }
    }
}

/// Permission bits a deployed artifact receives on the remote host.
pub fn remote_mode(role: PemRole) -> u32 {
    match role {
        PemRole::Key => PRIVATE_PEM_MODE,
        PemRole::Ca | PemRole::Certificate => PUBLIC_PEM_MODE,
    }
}

/// Drives certificate issuance, deployment, daemon reconfiguration and
/// restart for one host at a time.
///
/// Each call to [`install_certificate`](Self::install_certificate) opens its
/// own session through the connector; the orchestrator holds no per-host
/// state and can be shared by callers running hosts in parallel.
pub struct ProvisioningOrchestrator<'a> {
    connector: &'a dyn Connector,
    authority: &'a dyn CertificateAuthority,
    sleeper: &'a dyn Sleeper,
    retry: RetryPolicy,
    cancel: Option<CancelToken>,
    observer: Option<&'a dyn Fn(&str, RunState)>,
}

impl<'a> ProvisioningOrchestrator<'a> {
    pub fn new(connector: &'a dyn Connector, authority: &'a dyn CertificateAuthority) -> Self {
        Self {
            connector,
            authority,
            sleeper: &THREAD_SLEEPER,
            retry: RetryPolicy::default(),
            cancel: None,
            observer: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Called with the host identity on every state transition.
    pub fn with_observer(mut self, observer: &'a dyn Fn(&str, RunState)) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Issue a server certificate for `target` and switch its daemon to
    /// mutual TLS.
    ///
    /// Hosts not running the managed daemon are skipped without touching any
    /// collaborator. Otherwise the first failing step ends the run; anything
    /// already written to the host stays in place.
    pub fn install_certificate<S: AsRef<str>>(
        &self,
        host: &HostDescriptor,
        target: &str,
        alternate_names: &[S],
    ) -> Result<(), ProvisioningError> {
        if !host.is_managed_daemon() {
            tracing::info!(host = target, "skipping Docker certificate install");
            return Ok(());
        }

        let subjects = SubjectNames::for_host(target, alternate_names);
        let mut session = self.connector.connect(host, target);
        let mut state = RunState::Unprobed;

        let result = self.run(host, &subjects, session.as_mut(), &mut state);
        if let Err(err) = &result {
            self.transition(session.identity(), &mut state, RunState::Failed(err.step()));
        }
        result
    }

    fn run(
        &self,
        host: &HostDescriptor,
        subjects: &SubjectNames,
        session: &mut dyn RemoteExecutor,
        state: &mut RunState,
    ) -> Result<(), ProvisioningError> {
        let identity = session.identity().to_string();

        self.checkpoint(&identity, ProvisioningStep::GenerateCertificate)?;
        tracing::info!(host = %identity, %subjects, "generate cert for subjects");
        let material = self
            .authority
            .generate_server_certificate(host.cert_path(), host.organization(), subjects.as_slice())
            .map_err(|source| ProvisioningError::CertificateGenerationFailed {
                host: identity.clone(),
                source,
            })?;

        tracing::info!(host = %identity, "configure docker engine");
        session.escalate();

        self.wait_for_host(session)?;
        self.transition(&identity, state, RunState::Reachable);

        self.deploy_certificates(session, &material)?;
        self.transition(&identity, state, RunState::CertificatesDeployed);

        self.patch_daemon_config(session, &material)?;
        self.transition(&identity, state, RunState::ConfigPatched);

        self.restart_service(session)?;
        self.transition(&identity, state, RunState::ServiceRestarted);

        self.transition(&identity, state, RunState::Done);
        Ok(())
    }

    fn wait_for_host(&self, session: &mut dyn RemoteExecutor) -> Result<(), ProvisioningError> {
        let identity = session.identity().to_string();
        let probe = |attempt: u32| {
            session.run(PROBE_COMMAND).inspect_err(|err| {
                tracing::debug!(host = %identity, attempt, error = %err, "host not ready");
            })
        };

        match wait_until_ready(probe, self.retry, self.sleeper, self.cancel.as_ref()) {
            Ok(_) => Ok(()),
            Err(WaitError::Exhausted { attempts, last }) => Err(ProvisioningError::HostUnreachable {
                host: identity,
                attempts,
                source: last,
            }),
            Err(WaitError::Cancelled) => Err(ProvisioningError::Cancelled {
                host: identity,
                step: ProvisioningStep::Probe,
            }),
        }
    }

    /// Copies certificate, key, then CA. No rollback on failure.
    fn deploy_certificates(
        &self,
        session: &mut dyn RemoteExecutor,
        material: &ServerCertificate,
    ) -> Result<(), ProvisioningError> {
        let identity = session.identity().to_string();
        for block in [&material.cert, &material.key, &material.ca] {
            self.checkpoint(&identity, ProvisioningStep::DeployCertificates)?;

            let path = remote_cert_path(block.name());
            let mode = remote_mode(block.role());
            session
                .copy(block.contents(), &path, mode)
                .map_err(|source| ProvisioningError::TransferFailed {
                    host: identity.clone(),
                    artifact: block.role(),
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(host = %identity, artifact = %block.role(), path = %path, "sent");
        }
        Ok(())
    }

    fn patch_daemon_config(
        &self,
        session: &mut dyn RemoteExecutor,
        material: &ServerCertificate,
    ) -> Result<(), ProvisioningError> {
        let identity = session.identity().to_string();
        self.checkpoint(&identity, ProvisioningStep::LoadConfig)?;

        let mut raw = Vec::new();
        session
            .load(DAEMON_CONFIG_PATH, &mut raw)
            .map_err(|source| ProvisioningError::ConfigLoadFailed {
                host: identity.clone(),
                path: DAEMON_CONFIG_PATH.to_string(),
                source,
            })?;

        let mut config =
            DaemonConfig::parse(&raw).map_err(|source| ProvisioningError::ConfigParseFailed {
                host: identity.clone(),
                path: DAEMON_CONFIG_PATH.to_string(),
                source,
            })?;

        config.add_host(TLS_BIND_ADDRESS);
        config.set_tls_verify(true);
        config.set_tls_ca_cert(&remote_cert_path(material.ca.name()));
        config.set_tls_cert(&remote_cert_path(material.cert.name()));
        config.set_tls_key(&remote_cert_path(material.key.name()));

        let write_failed = |source: ConfigWriteError| {
            ProvisioningError::ConfigWriteFailed {
                host: identity.clone(),
                path: DAEMON_CONFIG_PATH.to_string(),
                source,
            }
        };
        let bytes = config.to_bytes().map_err(|e| write_failed(e.into()))?;
        session
            .copy(&bytes, DAEMON_CONFIG_PATH, DAEMON_CONFIG_MODE)
            .map_err(|e| write_failed(e.into()))?;

        tracing::info!(host = %identity, path = DAEMON_CONFIG_PATH, "configured docker engine");
        Ok(())
    }

    /// Stop is best effort; only a failed start ends the run.
    fn restart_service(&self, session: &mut dyn RemoteExecutor) -> Result<(), ProvisioningError> {
        let identity = session.identity().to_string();
        self.checkpoint(&identity, ProvisioningStep::RestartService)?;

        // Once stopped, the daemon is always started again.
        match session.run(STOP_COMMAND) {
            Ok(_) => tracing::info!(host = %identity, "stopped docker engine"),
            Err(err) => {
                tracing::warn!(host = %identity, error = %err, "stop failed, starting anyway")
            }
        }

        session
            .run(START_COMMAND)
            .map_err(|source| ProvisioningError::ServiceRestartFailed {
                host: identity.clone(),
                source,
            })?;
        tracing::info!(host = %identity, "started docker engine");
        Ok(())
    }

    fn checkpoint(&self, host: &str, step: ProvisioningStep) -> Result<(), ProvisioningError> {
        match &self.cancel {
            Some(cancel) if cancel.is_cancelled() => Err(ProvisioningError::Cancelled {
                host: host.to_string(),
                step,
            }),
            _ => Ok(()),
        }
    }

    fn transition(&self, host: &str, state: &mut RunState, next: RunState) {
        tracing::debug!(host, from = %state, to = %next, "run state");
        *state = next;
        if let Some(observer) = self.observer {
            observer(host, next);
        }
    }
}
