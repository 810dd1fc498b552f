//! Client-side TLS connector, analogous to the teacher's `app::tls` module
//! which builds a `tokio_native_tls::TlsAcceptor` for inbound connections
//! from a certificate/key/CA triple; this builds the outbound counterpart,
//! a `tokio_native_tls::TlsConnector`, from a CA file and verification mode.

use std::fs;
use std::path::Path;

use crate::errors::ConfigurationError;

/// How strictly the client verifies the server's certificate (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerifyMode {
    /// Infer from whether a CA file was supplied: `Strict` if present,
    /// otherwise the platform's default trust store.
    #[default]
    Default,
    /// Trust any certificate; do not verify the chain or hostname.
    Insecure,
    /// Verify the chain but not the hostname.
    NoHostVerification,
    /// Verify chain and hostname against the supplied (or system) CA.
    Strict,
}

/// Builds a `native_tls::TlsConnector` for the given CA file and mode.
pub fn build_connector(
    ca_file: Option<&Path>,
    mode: TlsVerifyMode,
) -> Result<native_tls::TlsConnector, ConfigurationError> {
    let mut builder = native_tls::TlsConnector::builder();

    match mode {
        TlsVerifyMode::Insecure => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        TlsVerifyMode::NoHostVerification => {
            builder.danger_accept_invalid_hostnames(true);
        }
        TlsVerifyMode::Strict | TlsVerifyMode::Default => {}
    }

    if let Some(path) = ca_file {
        let pem = fs::read(path)
            .map_err(|e| ConfigurationError::Tls(format!("reading CA file {path:?}: {e}")))?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| ConfigurationError::Tls(format!("parsing CA file {path:?}: {e}")))?;
        builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| ConfigurationError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_connector_with_no_ca_file() {
        build_connector(None, TlsVerifyMode::Default).unwrap();
    }

    #[test]
    fn insecure_mode_still_builds() {
        build_connector(None, TlsVerifyMode::Insecure).unwrap();
    }

    #[test]
    fn missing_ca_file_is_a_configuration_error() {
        let err = build_connector(Some(Path::new("/nonexistent/ca.pem")), TlsVerifyMode::Strict)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Tls(_)));
    }
}
