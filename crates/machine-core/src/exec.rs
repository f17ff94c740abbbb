//! Run one command or script across a list of hosts.

use std::borrow::Cow;
use std::path::Path;

use anyhow::Context;
use shell_escape::unix::escape;

use crate::remote::{CommandOutput, Connector, RemoteError};
use crate::types::HostDescriptor;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub sudo: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum HostOutcome {
    Completed(CommandOutput),
    Failed(RemoteError),
    Skipped,
}

#[derive(Debug)]
pub struct HostResult {
    pub host: String,
    pub outcome: HostOutcome,
}

#[derive(Debug, Default)]
pub struct ExecReport {
    pub results: Vec<HostResult>,
}

impl ExecReport {
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|result| matches!(result.outcome, HostOutcome::Failed(_)))
            .count()
    }
}

/// Run `command` on each host in order, one session per host.
///
/// A failing host does not stop the remaining ones. In dry-run mode no
/// session is opened and every host is reported as skipped.
pub fn run_on_hosts<S: AsRef<str>>(
    connector: &dyn Connector,
    descriptor: &HostDescriptor,
    hosts: &[S],
    command: &str,
    options: ExecOptions,
) -> ExecReport {
    let mut report = ExecReport::default();

    for host in hosts {
        let host = host.as_ref();
        if options.dry_run {
            tracing::info!(host, command, "dry run");
            report.results.push(HostResult {
                host: host.to_string(),
                outcome: HostOutcome::Skipped,
            });
            continue;
        }

        let mut session = connector.connect(descriptor, host);
        if options.sudo {
            session.escalate();
        }
        let outcome = match session.run(command) {
            Ok(output) => HostOutcome::Completed(output),
            Err(err) => {
                tracing::warn!(host, error = %err, "command failed");
                HostOutcome::Failed(err)
            }
        };
        report.results.push(HostResult {
            host: host.to_string(),
            outcome,
        });
    }

    report
}

/// Read a local shell script for remote execution.
pub fn load_script(path: &Path) -> anyhow::Result<String> {
    let script = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    if script.trim().is_empty() {
        anyhow::bail!("Script is empty: {}", path.display());
    }
    Ok(script)
}

/// Remote command that runs `script` under `sh`, whatever the login shell.
pub fn script_command(script: &str) -> String {
    format!("sh -c {}", escape(Cow::Borrowed(script)))
}

/// Run a script on each host in order. Same semantics as [`run_on_hosts`].
pub fn run_script_on_hosts<S: AsRef<str>>(
    connector: &dyn Connector,
    descriptor: &HostDescriptor,
    hosts: &[S],
    script: &str,
    options: ExecOptions,
) -> ExecReport {
    run_on_hosts(connector, descriptor, hosts, &script_command(script), options)
}
