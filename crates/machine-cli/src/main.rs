//! Machine - container-engine host provisioning
//!
//! Usage:
//!   machine tls bootstrap                    # Create CA and client certificate
//!   machine tls generate --host H            # Issue a server certificate locally
//!   machine tls install --host H             # Install TLS on a remote engine
//!   machine exec --host H run -- CMD         # Run a command on remote hosts
//!   machine exec --host H script FILE        # Run a local script on remote hosts

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use machine_core::settings::DEFAULT_CERT_PATH;

/// Progress from both crates at `info`, everything else at `warn`.
const DEFAULT_LOG_FILTER: &str = "machine_core=info,machine_cli=info,warn";

#[derive(Parser)]
#[command(name = "machine")]
#[command(about = "Provision and manage container-engine hosts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Utility for generating certificate for TLS
    Tls(TlsArgs),

    /// Invoke command on remote host via SSH
    Exec(ExecArgs),
}

#[derive(Args)]
struct TlsArgs {
    /// Certificate path
    #[arg(long, default_value = DEFAULT_CERT_PATH, global = true)]
    certpath: String,

    /// Organization for CA (defaults to machine.toml, then podd.org)
    #[arg(long, global = true)]
    organization: Option<String>,

    #[command(subcommand)]
    command: TlsCommand,
}

#[derive(Subcommand)]
enum TlsCommand {
    /// Generate CA and client certificate for TLS
    Bootstrap,

    /// Generate server certificate with self-signed CA
    Generate {
        /// Generate certificate for Host
        #[arg(long)]
        host: String,

        /// Alternative name for Host
        #[arg(long)]
        altname: Vec<String>,
    },

    /// Generate and install certificate for Docker Engine
    Install {
        /// Generate certificate for Host
        #[arg(long)]
        host: String,

        /// Alternative name for Host
        #[arg(long)]
        altname: Vec<String>,

        #[command(flatten)]
        ssh: SshArgs,
    },
}

#[derive(Args)]
struct SshArgs {
    /// Run command as user
    #[arg(long, env = "MACHINE_USER")]
    user: Option<String>,

    /// Private key to use in Authentication
    #[arg(long, env = "MACHINE_CERT_FILE")]
    cert: Option<PathBuf>,

    /// SSH port of the remote host
    #[arg(long, env = "MACHINE_PORT")]
    port: Option<u16>,
}

#[derive(Args)]
struct ExecArgs {
    #[command(flatten)]
    ssh: SshArgs,

    /// Enable Dry Run
    #[arg(long)]
    dryrun: bool,

    /// Remote host to run command in
    #[arg(long = "host", required = true)]
    hosts: Vec<String>,

    #[command(subcommand)]
    command: ExecCommand,
}

#[derive(Subcommand)]
enum ExecCommand {
    /// Invoke command from argument
    Run {
        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Invoke script from argument
    Script {
        /// Run as sudo for this session
        #[arg(long)]
        sudo: bool,

        /// Local script file to run on each host
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tls(args) => match args.command {
            TlsCommand::Bootstrap => {
                commands::tls_bootstrap(&args.certpath, args.organization.as_deref())
            }
            TlsCommand::Generate { host, altname } => commands::tls_generate(
                &args.certpath,
                args.organization.as_deref(),
                &host,
                &altname,
            ),
            TlsCommand::Install { host, altname, ssh } => commands::tls_install(
                &args.certpath,
                args.organization,
                ssh,
                &host,
                &altname,
            ),
        },
        Commands::Exec(args) => match args.command {
            ExecCommand::Run { command } => {
                commands::exec_run(args.ssh, &args.hosts, &command, args.dryrun)
            }
            ExecCommand::Script { sudo, file } => {
                commands::exec_script(args.ssh, &args.hosts, &file, sudo, args.dryrun)
            }
        },
    }
}
