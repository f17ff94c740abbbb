//! End-to-end provisioning runs against an in-memory host.

use std::time::Duration;

use serde_json::{Value, json};

use machine_core::daemon::{DAEMON_CONFIG_PATH, TLS_BIND_ADDRESS};
use machine_core::provision::{
    CancelToken, PROBE_COMMAND, ProvisioningError, ProvisioningOrchestrator, ProvisioningStep,
    RetryPolicy, START_COMMAND, STOP_COMMAND,
};
use machine_core::testing::{FakeExecutor, RecordingSleeper, RemoteCall, StaticAuthority};
use machine_core::types::{HostDescriptor, PemRole};

const CERT: &str = "/etc/docker/server-cert.pem";
const KEY: &str = "/etc/docker/server-key.pem";
const CA: &str = "/etc/docker/ca.pem";

fn managed_host() -> HostDescriptor {
    HostDescriptor::new("/home/ops/.machine", "podd.org")
        .with_user(Some("ubuntu".to_string()))
        .with_managed_daemon(true)
}

fn install(
    remote: &FakeExecutor,
    authority: &StaticAuthority,
    sleeper: &RecordingSleeper,
    host: &HostDescriptor,
) -> Result<(), ProvisioningError> {
    ProvisioningOrchestrator::new(remote, authority)
        .with_sleeper(sleeper)
        .install_certificate(host, "10.0.0.5", &["db.internal"])
}

fn daemon_json(remote: &FakeExecutor) -> Value {
    let file = remote.file(DAEMON_CONFIG_PATH).expect("daemon.json written");
    serde_json::from_slice(&file.contents).unwrap()
}

#[test]
fn unmanaged_host_is_a_no_op() {
    let remote = FakeExecutor::new();
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();
    let host = HostDescriptor::new("/certs", "podd.org");

    install(&remote, &authority, &sleeper, &host).unwrap();

    assert!(remote.calls().is_empty());
    assert!(authority.requests().is_empty());
    assert!(sleeper.sleeps().is_empty());
}

#[test]
fn successful_run_deploys_patches_and_restarts() {
    let remote = FakeExecutor::new().with_file(DAEMON_CONFIG_PATH, br#"{"debug": true}"#);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    install(&remote, &authority, &sleeper, &managed_host()).unwrap();

    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::Connect("10.0.0.5".to_string()),
            RemoteCall::Escalate,
            RemoteCall::Run(PROBE_COMMAND.to_string()),
            RemoteCall::Copy {
                path: CERT.to_string(),
                mode: 0o644
            },
            RemoteCall::Copy {
                path: KEY.to_string(),
                mode: 0o600
            },
            RemoteCall::Copy {
                path: CA.to_string(),
                mode: 0o644
            },
            RemoteCall::Load(DAEMON_CONFIG_PATH.to_string()),
            RemoteCall::Copy {
                path: DAEMON_CONFIG_PATH.to_string(),
                mode: 0o600
            },
            RemoteCall::Run(STOP_COMMAND.to_string()),
            RemoteCall::Run(START_COMMAND.to_string()),
        ]
    );

    assert_eq!(remote.file(CERT).unwrap().contents, b"cert-pem");
    assert_eq!(remote.file(KEY).unwrap().contents, b"key-pem");
    assert_eq!(remote.file(CA).unwrap().contents, b"ca-pem");

    let config = daemon_json(&remote);
    assert_eq!(config["debug"], json!(true));
    assert_eq!(config["hosts"], json!([TLS_BIND_ADDRESS]));
    assert_eq!(config["tlsverify"], json!(true));
    assert_eq!(config["tlscacert"], json!(CA));
    assert_eq!(config["tlscert"], json!(CERT));
    assert_eq!(config["tlskey"], json!(KEY));
    assert!(sleeper.sleeps().is_empty());
}

#[test]
fn certificate_request_uses_descriptor_and_subjects() {
    let remote = FakeExecutor::new().with_file(DAEMON_CONFIG_PATH, b"{}");
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    install(&remote, &authority, &sleeper, &managed_host()).unwrap();

    let requests = authority.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].organization, "podd.org");
    assert_eq!(
        requests[0].cert_path,
        std::path::PathBuf::from("/home/ops/.machine")
    );
    assert_eq!(
        requests[0].subjects,
        ["10.0.0.5", "localhost", "127.0.0.1", "db.internal"]
    );
}

#[test]
fn stop_failure_is_swallowed() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_command(STOP_COMMAND);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    install(&remote, &authority, &sleeper, &managed_host()).unwrap();

    let commands = remote.commands();
    assert_eq!(commands[commands.len() - 2], STOP_COMMAND);
    assert_eq!(commands[commands.len() - 1], START_COMMAND);
}

#[test]
fn start_failure_is_fatal() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_command(START_COMMAND);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    assert!(matches!(err, ProvisioningError::ServiceRestartFailed { .. }));
    assert_eq!(err.host(), "10.0.0.5");
    assert_eq!(err.step(), ProvisioningStep::RestartService);
}

#[test]
fn probe_retries_until_host_answers() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_probes(2);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    install(&remote, &authority, &sleeper, &managed_host()).unwrap();

    let probes = remote
        .commands()
        .iter()
        .filter(|command| *command == PROBE_COMMAND)
        .count();
    assert_eq!(probes, 3);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5); 2]);
}

#[test]
fn unreachable_host_stops_before_any_mutation() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_probes(5);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    match &err {
        ProvisioningError::HostUnreachable { host, attempts, .. } => {
            assert_eq!(host, "10.0.0.5");
            assert_eq!(*attempts, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(remote.commands(), vec![PROBE_COMMAND.to_string(); 5]);
    assert!(
        !remote
            .calls()
            .iter()
            .any(|call| matches!(call, RemoteCall::Copy { .. } | RemoteCall::Load(_)))
    );
}

#[test]
fn custom_retry_policy_is_honoured() {
    let remote = FakeExecutor::new().failing_probes(10);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = ProvisioningOrchestrator::new(&remote, &authority)
        .with_sleeper(&sleeper)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(250)))
        .install_certificate::<&str>(&managed_host(), "10.0.0.5", &[])
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisioningError::HostUnreachable { attempts: 2, .. }
    ));
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(250)]);
}

#[test]
fn key_transfer_failure_skips_ca_copy() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_copy(KEY);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    match &err {
        ProvisioningError::TransferFailed { artifact, path, .. } => {
            assert_eq!(*artifact, PemRole::Key);
            assert_eq!(path, KEY);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The certificate sent before the failure stays on the host.
    assert!(remote.file(CERT).is_some());
    assert!(remote.file(CA).is_none());
    assert!(
        !remote
            .calls()
            .iter()
            .any(|call| matches!(call, RemoteCall::Copy { path, .. } if path == CA))
    );
    assert!(remote.commands().iter().all(|c| c == PROBE_COMMAND));
}

#[test]
fn certificate_generation_failure_touches_nothing_remote() {
    let remote = FakeExecutor::new();
    let authority = StaticAuthority::failing();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    assert!(matches!(
        err,
        ProvisioningError::CertificateGenerationFailed { .. }
    ));
    assert_eq!(
        remote.calls(),
        vec![RemoteCall::Connect("10.0.0.5".to_string())]
    );
}

#[test]
fn missing_daemon_config_is_a_load_failure() {
    let remote = FakeExecutor::new();
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    assert!(matches!(err, ProvisioningError::ConfigLoadFailed { .. }));
    assert!(!remote.commands().iter().any(|c| c == STOP_COMMAND));
}

#[test]
fn malformed_daemon_config_is_not_repaired() {
    let remote = FakeExecutor::new().with_file(DAEMON_CONFIG_PATH, b"{ not json");
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    assert!(matches!(err, ProvisioningError::ConfigParseFailed { .. }));
    assert_eq!(
        remote.file(DAEMON_CONFIG_PATH).unwrap().contents,
        b"{ not json"
    );
}

#[test]
fn config_write_failure_skips_restart() {
    let remote = FakeExecutor::new()
        .with_file(DAEMON_CONFIG_PATH, b"{}")
        .failing_copy(DAEMON_CONFIG_PATH);
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    let err = install(&remote, &authority, &sleeper, &managed_host()).unwrap_err();

    assert!(matches!(err, ProvisioningError::ConfigWriteFailed { .. }));
    assert_eq!(remote.commands(), vec![PROBE_COMMAND.to_string()]);
}

#[test]
fn rerun_does_not_duplicate_bind_address() {
    let remote = FakeExecutor::new().with_file(
        DAEMON_CONFIG_PATH,
        br#"{"hosts": ["unix:///var/run/docker.sock"], "debug": true}"#,
    );
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();

    install(&remote, &authority, &sleeper, &managed_host()).unwrap();
    install(&remote, &authority, &sleeper, &managed_host()).unwrap();

    let config = daemon_json(&remote);
    assert_eq!(
        config["hosts"],
        json!(["unix:///var/run/docker.sock", TLS_BIND_ADDRESS])
    );
    assert_eq!(config["debug"], json!(true));
}

#[test]
fn cancelled_run_stops_at_next_step() {
    let remote = FakeExecutor::new().with_file(DAEMON_CONFIG_PATH, b"{}");
    let authority = StaticAuthority::new();
    let sleeper = RecordingSleeper::default();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = ProvisioningOrchestrator::new(&remote, &authority)
        .with_sleeper(&sleeper)
        .with_cancel_token(cancel)
        .install_certificate::<&str>(&managed_host(), "10.0.0.5", &[])
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisioningError::Cancelled {
            step: ProvisioningStep::GenerateCertificate,
            ..
        }
    ));
    assert!(authority.requests().is_empty());
}
