//! CA stored as PEM files in the local certificate directory, signed with `rcgen`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};

use super::{
    CA_CERT_FILE, CA_KEY_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE, CertError,
    CertificateAuthority, PRIVATE_PEM_MODE, PUBLIC_PEM_MODE, SERVER_CERT_FILE, SERVER_KEY_FILE,
    ServerCertificate,
};
use crate::types::{PemBlock, PemRole};

const DAY: u64 = 24 * 60 * 60;

/// CA certificate validity period.
const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * DAY);

/// Validity for issued server and client certificates.
const LEAF_VALIDITY: Duration = Duration::from_secs(1080 * DAY);

/// Loads `ca.pem`/`ca-key.pem` from the certificate path on every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCertificateAuthority;

impl CertificateAuthority for FileCertificateAuthority {
    fn generate_server_certificate(
        &self,
        cert_path: &Path,
        organization: &str,
        subjects: &[String],
    ) -> Result<ServerCertificate, CertError> {
        let primary = subjects.first().ok_or(CertError::NoSubjects)?;
        let (ca_pem, ca_key, ca_cert) = load_ca(cert_path)?;

        let mut params = CertificateParams::new(subjects.to_vec())?;
        params.distinguished_name = organization_name(organization, primary);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        set_validity(&mut params, LEAF_VALIDITY);

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &ca_cert, &ca_key)?;

        tracing::debug!(
            cert_path = %cert_path.display(),
            subjects = subjects.len(),
            "Issued server certificate"
        );

        Ok(ServerCertificate {
            ca: PemBlock::new(CA_CERT_FILE, ca_pem, PemRole::Ca),
            cert: PemBlock::new(SERVER_CERT_FILE, cert.pem(), PemRole::Certificate),
            key: PemBlock::new(SERVER_KEY_FILE, key.serialize_pem(), PemRole::Key),
        })
    }
}

/// Files written by [`bootstrap`].
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Create a self-signed CA and a client certificate in `cert_path`.
///
/// Refuses to replace an existing CA, since every certificate it signed
/// would stop verifying.
pub fn bootstrap(cert_path: &Path, organization: &str) -> Result<BootstrapReport, CertError> {
    let ca_cert_path = cert_path.join(CA_CERT_FILE);
    if ca_cert_path.exists() {
        return Err(CertError::CaAlreadyExists(cert_path.to_path_buf()));
    }
    std::fs::create_dir_all(cert_path).map_err(|e| CertError::io(cert_path, e))?;

    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = organization_name(organization, organization);
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut ca_params, CA_VALIDITY);

    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let mut client_params = CertificateParams::default();
    client_params.distinguished_name = organization_name(organization, "client");
    client_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    set_validity(&mut client_params, LEAF_VALIDITY);

    let client_key = KeyPair::generate()?;
    let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key)?;

    let report = BootstrapReport {
        ca_cert: ca_cert_path,
        ca_key: cert_path.join(CA_KEY_FILE),
        client_cert: cert_path.join(CLIENT_CERT_FILE),
        client_key: cert_path.join(CLIENT_KEY_FILE),
    };

    write_pem_file(&report.ca_key, ca_key.serialize_pem().as_bytes(), PRIVATE_PEM_MODE)?;
    write_pem_file(&report.ca_cert, ca_cert.pem().as_bytes(), PUBLIC_PEM_MODE)?;
    write_pem_file(&report.client_key, client_key.serialize_pem().as_bytes(), PRIVATE_PEM_MODE)?;
    write_pem_file(&report.client_cert, client_cert.pem().as_bytes(), PUBLIC_PEM_MODE)?;

    tracing::info!(
        path = %cert_path.display(),
        organization,
        "CA and client certificate created"
    );

    Ok(report)
}

/// Write a PEM file, creating or truncating it with the given mode.
pub fn write_pem_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), CertError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(|e| CertError::io(path, e))?;
    file.write_all(contents).map_err(|e| CertError::io(path, e))?;

    // The open mode only applies to newly created files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| CertError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn load_ca(cert_path: &Path) -> Result<(String, KeyPair, Certificate), CertError> {
    let ca_cert_path = cert_path.join(CA_CERT_FILE);
    let ca_key_path = cert_path.join(CA_KEY_FILE);
    if !ca_cert_path.exists() || !ca_key_path.exists() {
        return Err(CertError::CaNotInitialized(cert_path.to_path_buf()));
    }

    let ca_pem =
        std::fs::read_to_string(&ca_cert_path).map_err(|e| CertError::io(&ca_cert_path, e))?;
    let key_pem =
        std::fs::read_to_string(&ca_key_path).map_err(|e| CertError::io(&ca_key_path, e))?;

    let ca_key = KeyPair::from_pem(&key_pem)?;
    // Re-signing the parsed params with the same key yields an issuer with
    // the stored subject and key identifier.
    let ca_cert = CertificateParams::from_ca_cert_pem(&ca_pem)?.self_signed(&ca_key)?;

    Ok((ca_pem, ca_key, ca_cert))
}

fn organization_name(organization: &str, common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::OrganizationName, organization);
    name.push(DnType::CommonName, common_name);
    name
}

fn set_validity(params: &mut CertificateParams, validity: Duration) {
    let not_before = SystemTime::now();
    params.not_before = not_before.into();
    params.not_after = (not_before + validity).into();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::SanType;
    use tempfile::TempDir;

    fn subjects(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn bootstrap_writes_ca_and_client_files() {
        let temp = TempDir::new().unwrap();

        let report = bootstrap(temp.path(), "podd.org").unwrap();

        for path in [
            &report.ca_cert,
            &report.ca_key,
            &report.client_cert,
            &report.client_key,
        ] {
            assert!(path.exists(), "missing {}", path.display());
        }
        let ca = std::fs::read_to_string(&report.ca_cert).unwrap();
        assert!(ca.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_restricts_private_keys() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let report = bootstrap(temp.path(), "podd.org").unwrap();

        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&report.ca_key), 0o600);
        assert_eq!(mode(&report.client_key), 0o600);
        assert_eq!(mode(&report.ca_cert), 0o644);
        assert_eq!(mode(&report.client_cert), 0o644);
    }

    #[test]
    fn bootstrap_refuses_existing_ca() {
        let temp = TempDir::new().unwrap();
        bootstrap(temp.path(), "podd.org").unwrap();

        let err = bootstrap(temp.path(), "podd.org").unwrap_err();
        assert!(matches!(err, CertError::CaAlreadyExists(_)));
    }

    #[test]
    fn server_certificate_requires_ca() {
        let temp = TempDir::new().unwrap();

        let err = FileCertificateAuthority
            .generate_server_certificate(temp.path(), "podd.org", &subjects(&["node-1"]))
            .unwrap_err();

        assert!(matches!(err, CertError::CaNotInitialized(_)));
        assert!(err.to_string().contains("tls bootstrap"));
    }

    #[test]
    fn server_certificate_requires_subjects() {
        let temp = TempDir::new().unwrap();
        bootstrap(temp.path(), "podd.org").unwrap();

        let err = FileCertificateAuthority
            .generate_server_certificate(temp.path(), "podd.org", &[])
            .unwrap_err();

        assert!(matches!(err, CertError::NoSubjects));
    }

    #[test]
    fn server_certificate_blocks_are_named_and_tagged() {
        let temp = TempDir::new().unwrap();
        bootstrap(temp.path(), "podd.org").unwrap();

        let issued = FileCertificateAuthority
            .generate_server_certificate(
                temp.path(),
                "podd.org",
                &subjects(&["10.0.0.5", "localhost", "127.0.0.1", "db.internal"]),
            )
            .unwrap();

        assert_eq!(issued.ca.name(), CA_CERT_FILE);
        assert_eq!(issued.ca.role(), PemRole::Ca);
        assert_eq!(issued.cert.name(), SERVER_CERT_FILE);
        assert_eq!(issued.cert.role(), PemRole::Certificate);
        assert_eq!(issued.key.name(), SERVER_KEY_FILE);
        assert_eq!(issued.key.role(), PemRole::Key);

        let stored_ca = std::fs::read(temp.path().join(CA_CERT_FILE)).unwrap();
        assert_eq!(issued.ca.contents(), stored_ca.as_slice());
        assert!(String::from_utf8_lossy(issued.key.contents()).contains("PRIVATE KEY"));
    }

    #[test]
    fn server_certificate_splits_ip_and_dns_subjects() {
        let temp = TempDir::new().unwrap();
        bootstrap(temp.path(), "podd.org").unwrap();

        let issued = FileCertificateAuthority
            .generate_server_certificate(
                temp.path(),
                "podd.org",
                &subjects(&["10.0.0.5", "localhost", "127.0.0.1", "db.internal"]),
            )
            .unwrap();

        let pem = String::from_utf8(issued.cert.contents().to_vec()).unwrap();
        let parsed = CertificateParams::from_ca_cert_pem(&pem).unwrap();
        let ips = parsed
            .subject_alt_names
            .iter()
            .filter(|san| matches!(san, SanType::IpAddress(_)))
            .count();
        let dns = parsed
            .subject_alt_names
            .iter()
            .filter(|san| matches!(san, SanType::DnsName(_)))
            .count();

        assert_eq!(ips, 2);
        assert_eq!(dns, 2);
    }
}
