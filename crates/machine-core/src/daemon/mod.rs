//! Container-engine daemon configuration (`daemon.json`).
//!
//! Only the bind addresses and TLS settings are modelled. Every other key is
//! kept in the underlying JSON map and written back untouched, in its
//! original position. Numbers keep their source text, so large integers and
//! trailing zeros survive a rewrite.

use serde_json::{Map, Value};

/// Remote location of the daemon configuration.
pub const DAEMON_CONFIG_PATH: &str = "/etc/docker/daemon.json";
pub const DAEMON_CONFIG_MODE: u32 = 0o600;

/// Remote directory receiving certificate material.
pub const DAEMON_CERT_DIR: &str = "/etc/docker";

/// Endpoint the daemon is told to listen on once TLS is enforced.
pub const TLS_BIND_ADDRESS: &str = "tcp://0.0.0.0:2375";

const HOSTS: &str = "hosts";
const TLS_VERIFY: &str = "tlsverify";
const TLS_CA_CERT: &str = "tlscacert";
const TLS_CERT: &str = "tlscert";
const TLS_KEY: &str = "tlskey";

#[derive(Debug, thiserror::Error)]
pub enum DaemonConfigError {
    #[error("invalid daemon configuration JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("daemon configuration must be a JSON object")]
    NotAnObject,

    #[error("daemon configuration field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Remote path for a certificate artifact named `name`.
pub fn remote_cert_path(name: &str) -> String {
    format!("{}/{}", DAEMON_CERT_DIR, name)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonConfig {
    root: Map<String, Value>,
}

impl DaemonConfig {
    /// Parse a raw document. An empty or whitespace-only document is an
    /// empty configuration.
    pub fn parse(raw: &[u8]) -> Result<Self, DaemonConfigError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let root = match serde_json::from_slice::<Value>(raw)? {
            Value::Object(map) => map,
            _ => return Err(DaemonConfigError::NotAnObject),
        };
        validate(&root)?;
        Ok(Self { root })
    }

    pub fn hosts(&self) -> Vec<&str> {
        match self.root.get(HOSTS) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Add a bind address unless it is already listed.
    ///
    /// Returns whether the document changed.
    pub fn add_host(&mut self, address: &str) -> bool {
        let entry = self
            .root
            .entry(HOSTS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        let Value::Array(items) = entry else {
            return false;
        };
        if items.iter().any(|item| item.as_str() == Some(address)) {
            return false;
        }
        items.push(Value::String(address.to_string()));
        true
    }

    pub fn tls_verify(&self) -> bool {
        self.root
            .get(TLS_VERIFY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_tls_verify(&mut self, verify: bool) {
        self.root.insert(TLS_VERIFY.to_string(), Value::Bool(verify));
    }

    pub fn tls_ca_cert(&self) -> Option<&str> {
        self.root.get(TLS_CA_CERT).and_then(Value::as_str)
    }

    pub fn set_tls_ca_cert(&mut self, path: &str) {
        self.set_string(TLS_CA_CERT, path);
    }

    pub fn tls_cert(&self) -> Option<&str> {
        self.root.get(TLS_CERT).and_then(Value::as_str)
    }

    pub fn set_tls_cert(&mut self, path: &str) {
        self.set_string(TLS_CERT, path);
    }

    pub fn tls_key(&self) -> Option<&str> {
        self.root.get(TLS_KEY).and_then(Value::as_str)
    }

    pub fn set_tls_key(&mut self, path: &str) {
        self.set_string(TLS_KEY, path);
    }

    /// The whole document, modelled and passthrough keys alike.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DaemonConfigError> {
        let mut bytes = serde_json::to_vec_pretty(&self.root)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.root
            .insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn validate(root: &Map<String, Value>) -> Result<(), DaemonConfigError> {
    if let Some(hosts) = root.get(HOSTS) {
        let valid = hosts
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !valid {
            return Err(DaemonConfigError::InvalidField {
                field: HOSTS,
                expected: "an array of strings",
            });
        }
    }
    if root.get(TLS_VERIFY).is_some_and(|value| !value.is_boolean()) {
        return Err(DaemonConfigError::InvalidField {
            field: TLS_VERIFY,
            expected: "a boolean",
        });
    }
    for field in [TLS_CA_CERT, TLS_CERT, TLS_KEY] {
        if root.get(field).is_some_and(|value| !value.is_string()) {
            return Err(DaemonConfigError::InvalidField {
                field,
                expected: "a string",
            });
        }
    }
    Ok(())
}
