//! Remote command and file channel to a single host.

pub mod ssh;

use std::io;

use crate::types::HostDescriptor;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to start remote client: {0}")]
    Spawn(#[source] io::Error),

    #[error("remote command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("remote channel i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Capabilities needed to drive one remote host.
///
/// A session is bound to exactly one host for the lifetime of a run and is
/// never shared across hosts.
pub trait RemoteExecutor {
    /// Run a shell command and capture its output. A non-zero exit is an error.
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Write `contents` to `remote_path` with permission bits `mode`,
    /// replacing any existing file.
    fn copy(&mut self, contents: &[u8], remote_path: &str, mode: u32) -> Result<(), RemoteError>;

    /// Append the contents of `remote_path` to `dest`.
    fn load(&mut self, remote_path: &str, dest: &mut Vec<u8>) -> Result<(), RemoteError>;

    /// Run every later operation of this session with elevated privileges.
    fn escalate(&mut self);

    /// Host label used in diagnostics.
    fn identity(&self) -> &str;
}

/// Opens a fresh session for one target host.
pub trait Connector {
    fn connect(&self, host: &HostDescriptor, target: &str) -> Box<dyn RemoteExecutor>;
}
