//! RemoteExecutor backed by the system OpenSSH client.

use std::borrow::Cow;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};

use shell_escape::unix::escape;

use super::{CommandOutput, Connector, RemoteError, RemoteExecutor};
use crate::types::HostDescriptor;

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub user: Option<String>,
    pub server: String,
    pub identity: Option<PathBuf>,
    pub port: u16,
}

impl SshConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            user: None,
            server: server.into(),
            identity: None,
            port: DEFAULT_SSH_PORT,
        }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.server),
            None => self.server.clone(),
        }
    }
}

/// Runs commands through `ssh` in batch mode. Every operation is a separate
/// `ssh` invocation; nothing is kept open between calls.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
    sudo: bool,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config, sudo: false }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn is_escalated(&self) -> bool {
        self.sudo
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "ConnectTimeout=10"])
            .arg("-p")
            .arg(self.config.port.to_string());
        if let Some(identity) = &self.config.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(self.config.destination()).arg("--");
        cmd
    }

    /// Wrap a shell snippet so it runs under sudo once escalated.
    pub fn remote_script(&self, script: &str) -> String {
        if self.sudo {
            format!("sudo -n sh -c {}", quote(script))
        } else {
            script.to_string()
        }
    }

    /// Stream `contents` into the child's stdin and reap it.
    ///
    /// The child is always waited on. When `ssh` exits early the write fails
    /// with a broken pipe, and the exit status plus stderr explain why.
    fn feed(&self, command: &str, mut child: Child, contents: &[u8]) -> Result<(), RemoteError> {
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(contents),
            None => Err(io::Error::other("ssh stdin was not captured")),
        };

        let output = child.wait_with_output()?;
        self.check(command, output)?;
        written.map_err(RemoteError::Io)
    }

    fn check(&self, command: &str, output: Output) -> Result<CommandOutput, RemoteError> {
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

impl RemoteExecutor for SshExecutor {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        tracing::debug!(host = %self.config.server, command, "ssh run");
        let output = self
            .base_command()
            .arg(self.remote_script(command))
            .stdin(Stdio::null())
            .output()
            .map_err(RemoteError::Spawn)?;
        self.check(command, output)
    }

    fn copy(&mut self, contents: &[u8], remote_path: &str, mode: u32) -> Result<(), RemoteError> {
        let script = copy_script(remote_path, mode);
        tracing::debug!(
            host = %self.config.server,
            path = remote_path,
            mode = %format_args!("{:o}", mode),
            "ssh copy"
        );

        let child = self
            .base_command()
            .arg(self.remote_script(&script))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RemoteError::Spawn)?;
        self.feed(&script, child, contents)
    }

    fn load(&mut self, remote_path: &str, dest: &mut Vec<u8>) -> Result<(), RemoteError> {
        let output = self.run(&format!("cat {}", quote(remote_path)))?;
        dest.extend_from_slice(&output.stdout);
        Ok(())
    }

    fn escalate(&mut self) {
        self.sudo = true;
    }

    fn identity(&self) -> &str {
        &self.config.server
    }
}

/// Opens [`SshExecutor`] sessions using the descriptor's user and identity.
#[derive(Debug, Clone, Copy)]
pub struct SshConnector {
    port: u16,
}

impl SshConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(DEFAULT_SSH_PORT)
    }
}

impl Connector for SshConnector {
    fn connect(&self, host: &HostDescriptor, target: &str) -> Box<dyn RemoteExecutor> {
        let config = SshConfig {
            user: host.user().map(str::to_string),
            server: target.to_string(),
            identity: host.credential().map(|path| path.to_path_buf()),
            port: self.port,
        };
        Box::new(SshExecutor::new(config))
    }
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

fn copy_script(remote_path: &str, mode: u32) -> String {
    let path = quote(remote_path);
    format!("umask 077 && cat > {path} && chmod {mode:o} {path}")
}
