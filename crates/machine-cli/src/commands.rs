//! Command handlers. Each builds its configuration once and hands it to the
//! core by reference; errors propagate to `main`.

use std::path::Path;

use anyhow::{Context, Result};

use machine_core::cert::{
    self, CertificateAuthority, FileCertificateAuthority, PRIVATE_PEM_MODE, PUBLIC_PEM_MODE,
};
use machine_core::exec::{
    ExecOptions, ExecReport, HostOutcome, load_script, run_on_hosts, run_script_on_hosts,
};
use machine_core::provision::{ProvisioningOrchestrator, RunState};
use machine_core::remote::ssh::SshConnector;
use machine_core::settings::{
    DEFAULT_CERT_PATH, HostFlags, Settings, expand_cert_path, prepare_cert_path,
};
use machine_core::types::{HostDescriptor, SubjectNames};

use crate::SshArgs;

pub fn tls_bootstrap(certpath: &str, organization: Option<&str>) -> Result<()> {
    let cert_path = prepare_cert_path(certpath)?;
    let settings = Settings::load(&cert_path)?;
    let organization = settings.organization_or(organization);

    let report = cert::bootstrap(&cert_path, organization)?;
    println!("CA certificate: {}", report.ca_cert.display());
    println!("Client certificate: {}", report.client_cert.display());
    Ok(())
}

pub fn tls_generate(
    certpath: &str,
    organization: Option<&str>,
    host: &str,
    altnames: &[String],
) -> Result<()> {
    let cert_path = prepare_cert_path(certpath)?;
    let settings = Settings::load(&cert_path)?;
    let organization = settings.organization_or(organization);

    let mut subjects = vec![host.to_string()];
    subjects.extend(altnames.iter().cloned());

    let issued =
        FileCertificateAuthority.generate_server_certificate(&cert_path, organization, &subjects)?;

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let cert_file = cwd.join(issued.cert.name());
    let key_file = cwd.join(issued.key.name());
    cert::write_pem_file(&cert_file, issued.cert.contents(), PUBLIC_PEM_MODE)?;
    cert::write_pem_file(&key_file, issued.key.contents(), PRIVATE_PEM_MODE)?;

    println!("Server certificate: {}", cert_file.display());
    println!("Server key: {}", key_file.display());
    Ok(())
}

pub fn tls_install(
    certpath: &str,
    organization: Option<String>,
    ssh: SshArgs,
    host: &str,
    altnames: &[String],
) -> Result<()> {
    let cert_path = prepare_cert_path(certpath)?;
    let settings = Settings::load(&cert_path)?;
    let connector = SshConnector::new(settings.port_or(ssh.port));
    let descriptor = settings.host_descriptor(
        cert_path,
        HostFlags {
            organization,
            user: ssh.user,
            identity: ssh.cert,
            managed_daemon: true,
        },
    );

    println!(
        "{} - generate cert for subjects - {}",
        host,
        SubjectNames::for_host(host, altnames)
    );
    let progress = |host: &str, state: RunState| println!("{} - {}", host, state);

    ProvisioningOrchestrator::new(&connector, &FileCertificateAuthority)
        .with_observer(&progress)
        .install_certificate(&descriptor, host, altnames)?;
    Ok(())
}

pub fn exec_run(ssh: SshArgs, hosts: &[String], command: &[String], dry_run: bool) -> Result<()> {
    let (connector, descriptor) = exec_session(ssh)?;
    let command = command.join(" ");

    let report = run_on_hosts(
        &connector,
        &descriptor,
        hosts,
        &command,
        ExecOptions {
            sudo: false,
            dry_run,
        },
    );
    print_report(&report, &command)
}

pub fn exec_script(
    ssh: SshArgs,
    hosts: &[String],
    file: &Path,
    sudo: bool,
    dry_run: bool,
) -> Result<()> {
    let script = load_script(file)?;
    let (connector, descriptor) = exec_session(ssh)?;

    let report = run_script_on_hosts(
        &connector,
        &descriptor,
        hosts,
        &script,
        ExecOptions { sudo, dry_run },
    );
    print_report(&report, &file.display().to_string())
}

fn exec_session(ssh: SshArgs) -> Result<(SshConnector, HostDescriptor)> {
    let cert_path = expand_cert_path(DEFAULT_CERT_PATH)?;
    let settings = Settings::load(&cert_path)?;
    let connector = SshConnector::new(settings.port_or(ssh.port));
    let descriptor = settings.host_descriptor(
        cert_path,
        HostFlags {
            user: ssh.user,
            identity: ssh.cert,
            ..HostFlags::default()
        },
    );
    Ok((connector, descriptor))
}

fn print_report(report: &ExecReport, what: &str) -> Result<()> {
    for result in &report.results {
        match &result.outcome {
            HostOutcome::Completed(output) => {
                for line in output.stdout_lossy().lines() {
                    println!("{} - {}", result.host, line);
                }
            }
            HostOutcome::Failed(err) => eprintln!("{} - {}", result.host, err),
            HostOutcome::Skipped => println!("{} - would run: {}", result.host, what),
        }
    }

    let failures = report.failures();
    if failures > 0 {
        anyhow::bail!("{} of {} hosts failed", failures, report.results.len());
    }
    Ok(())
}
