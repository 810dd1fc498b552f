//! Consumed configuration surface (§6). The DSN/env/credentials-file
//! resolver that produces a [`ConnectConfig`] is an external collaborator
//! not respecified here (§1); this module only defines the shape the core
//! consumes plus the TLS connector it builds from it.

pub mod tls;

use std::path::PathBuf;
use std::time::Duration;

pub use tls::TlsVerifyMode;

/// A fully resolved connection target, consumed (not parsed) by the core.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Branch name (protocol ≥2.0's replacement for `database`). Sent as its
    /// own `ClientHandshake` parameter alongside `database` when set (§4.3
    /// step 1); older servers that don't understand `branch` simply ignore
    /// an unrecognized handshake parameter.
    pub branch: Option<String>,
    /// Pre-shared key used in place of SCRAM password auth, e.g. for
    /// EdgeDB Cloud instances.
    pub secret_key: Option<String>,
    pub tls_ca_file: Option<PathBuf>,
    pub tls_verify_mode: TlsVerifyMode,
    pub connect_timeout: Duration,
    /// If `Some`, `connect()` retries dialing until this deadline elapses
    /// rather than failing on the first unreachable attempt.
    pub wait_until_available: Option<Duration>,
}

impl ConnectConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            database: database.into(),
            branch: None,
            secret_key: None,
            tls_ca_file: None,
            tls_verify_mode: TlsVerifyMode::default(),
            connect_timeout: Duration::from_secs(10),
            wait_until_available: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }
}
