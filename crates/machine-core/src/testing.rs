//! In-memory collaborators for exercising provisioning without a network,
//! a real CA or wall-clock delays.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cert::{
    CA_CERT_FILE, CertError, CertificateAuthority, SERVER_CERT_FILE, SERVER_KEY_FILE,
    ServerCertificate,
};
use crate::provision::{PROBE_COMMAND, Sleeper};
use crate::remote::{CommandOutput, Connector, RemoteError, RemoteExecutor};
use crate::types::{HostDescriptor, PemBlock, PemRole};

/// One recorded interaction with a fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Connect(String),
    Run(String),
    Copy { path: String, mode: u32 },
    Load(String),
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub contents: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<RemoteCall>,
    files: BTreeMap<String, RemoteFile>,
    probe_failures: u32,
    failing_commands: HashSet<String>,
    failing_copies: HashSet<String>,
    failing_loads: HashSet<String>,
    escalated: bool,
}

/// Scriptable host that records every call.
///
/// Clones share state, so a clone handed out as a session stays observable
/// through the original.
#[derive(Debug, Clone)]
pub struct FakeExecutor {
    identity: String,
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            identity: "fake-host".to_string(),
            state: Arc::default(),
        }
    }

    /// Seed a remote file, as if it already existed with mode 0644.
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.lock().files.insert(
            path.to_string(),
            RemoteFile {
                contents: contents.to_vec(),
                mode: 0o644,
            },
        );
        self
    }

    /// Fail the first `count` reachability probes.
    pub fn failing_probes(self, count: u32) -> Self {
        self.lock().probe_failures = count;
        self
    }

    pub fn failing_command(self, command: &str) -> Self {
        self.lock().failing_commands.insert(command.to_string());
        self
    }

    pub fn failing_copy(self, path: &str) -> Self {
        self.lock().failing_copies.insert(path.to_string());
        self
    }

    pub fn failing_load(self, path: &str) -> Self {
        self.lock().failing_loads.insert(path.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Commands run so far, probes included.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Run(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.lock().files.get(path).cloned()
    }

    pub fn is_escalated(&self) -> bool {
        self.lock().escalated
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failed(&self, command: &str) -> RemoteError {
        RemoteError::CommandFailed {
            command: command.to_string(),
            status: "1".to_string(),
            stderr: format!("{}: simulated failure", self.identity),
        }
    }
}

impl RemoteExecutor for FakeExecutor {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Run(command.to_string()));

        if command == PROBE_COMMAND && state.probe_failures > 0 {
            state.probe_failures -= 1;
            drop(state);
            return Err(RemoteError::Other(format!("{}: connection refused", self.identity)));
        }
        if state.failing_commands.contains(command) {
            drop(state);
            return Err(self.failed(command));
        }
        Ok(CommandOutput::default())
    }

    fn copy(&mut self, contents: &[u8], remote_path: &str, mode: u32) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Copy {
            path: remote_path.to_string(),
            mode,
        });

        if state.failing_copies.contains(remote_path) {
            drop(state);
            return Err(self.failed(&format!("copy {}", remote_path)));
        }
        state.files.insert(
            remote_path.to_string(),
            RemoteFile {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn load(&mut self, remote_path: &str, dest: &mut Vec<u8>) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Load(remote_path.to_string()));

        if state.failing_loads.contains(remote_path) {
            drop(state);
            return Err(self.failed(&format!("cat {}", remote_path)));
        }
        match state.files.get(remote_path) {
            Some(file) => {
                dest.extend_from_slice(&file.contents);
                Ok(())
            }
            None => {
                drop(state);
                Err(self.failed(&format!("cat {}", remote_path)))
            }
        }
    }

    fn escalate(&mut self) {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Escalate);
        state.escalated = true;
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

impl Connector for FakeExecutor {
    fn connect(&self, _host: &HostDescriptor, target: &str) -> Box<dyn RemoteExecutor> {
        self.lock().calls.push(RemoteCall::Connect(target.to_string()));
        Box::new(Self {
            identity: target.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// A certificate request seen by [`StaticAuthority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub cert_path: PathBuf,
    pub organization: String,
    pub subjects: Vec<String>,
}

/// Returns fixed PEM blocks and records every request.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    requests: Mutex<Vec<CertRequest>>,
    fail: bool,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CertRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn certificate() -> ServerCertificate {
        ServerCertificate {
            ca: PemBlock::new(CA_CERT_FILE, b"ca-pem".to_vec(), PemRole::Ca),
            cert: PemBlock::new(SERVER_CERT_FILE, b"cert-pem".to_vec(), PemRole::Certificate),
            key: PemBlock::new(SERVER_KEY_FILE, b"key-pem".to_vec(), PemRole::Key),
        }
    }
}

impl CertificateAuthority for StaticAuthority {
    fn generate_server_certificate(
        &self,
        cert_path: &Path,
        organization: &str,
        subjects: &[String],
    ) -> Result<ServerCertificate, CertError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CertRequest {
                cert_path: cert_path.to_path_buf(),
                organization: organization.to_string(),
                subjects: subjects.to_vec(),
            });
        if self.fail {
            return Err(CertError::CaNotInitialized(cert_path.to_path_buf()));
        }
        Ok(Self::certificate())
    }
}
