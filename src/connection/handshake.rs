//! Handshake & authentication (C3).

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::scram::ScramSha256;
use super::settings::ServerSettings;
use crate::config::ConnectConfig;
use crate::errors::{AuthenticationError, Error, ServerIdentifier};
use crate::protocol::constants::*;
use crate::protocol::{messages, ProtocolVersion, ServerMessage};

/// Everything the rest of C7 needs once the handshake completes.
pub struct HandshakeResult {
    pub negotiated_version: ProtocolVersion,
    pub settings: ServerSettings,
    pub state_descriptor: Option<(Uuid, Bytes)>,
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: bytes::BytesMut,
    server: &ServerIdentifier,
) -> Result<(), Error> {
    writer.write_all(&bytes).await.map_err(|e| {
        crate::errors::ClientConnectionError::Failed {
            server: server.clone(),
            source: e,
        }
    })?;
    writer.flush().await.map_err(|e| {
        crate::errors::ClientConnectionError::Failed {
            server: server.clone(),
            source: e,
        }
        .into()
    })
}

async fn recv_one(
    rx: &mut mpsc::Receiver<Result<ServerMessage, Error>>,
    server: &ServerIdentifier,
) -> Result<ServerMessage, Error> {
    rx.recv()
        .await
        .unwrap_or_else(|| Err(crate::errors::ClientConnectionError::Closed { server: server.clone() }.into()))
}

/// Runs the handshake sequence described in §4.3 to completion, leaving the
/// connection at `ReadyForCommand`.
pub async fn perform<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<Result<ServerMessage, Error>>,
    config: &ConnectConfig,
    min: ProtocolVersion,
    max: ProtocolVersion,
    server: &ServerIdentifier,
) -> Result<HandshakeResult, Error> {
    let mut params: Vec<(&str, &str)> = vec![("user", &config.user), ("database", &config.database)];
    if let Some(branch) = &config.branch {
        params.push(("branch", branch));
    }
    if let Some(secret_key) = &config.secret_key {
        params.push(("secret_key", secret_key));
    }
    let handshake = messages::client_handshake(max.major, max.minor, &params);
    write_message(writer, handshake, server).await?;

    let mut negotiated = max;
    let mut scram: Option<ScramSha256> = None;
    let mut settings = ServerSettings::new();
    let mut state_descriptor = None;

    loop {
        match recv_one(rx, server).await? {
            ServerMessage::ServerHandshake { major, minor } => {
                negotiated = ProtocolVersion::new(major, minor);
                if negotiated < min || negotiated > max {
                    return Err(Error::UnsupportedProtocolVersion {
                        got: (major, minor),
                        min: (min.major, min.minor),
                        max: (max.major, max.minor),
                    });
                }
            }
            ServerMessage::AuthenticationOk => {
                log::debug!(
                    "authenticated to {server} with protocol {}.{}",
                    negotiated.major,
                    negotiated.minor
                );
            }
            ServerMessage::AuthenticationSasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(AuthenticationError::UnexpectedStatus(AUTH_SASL).into());
                }
                let password = config.password.as_deref().ok_or_else(|| {
                    Error::from(AuthenticationError::Rejected(server.clone()))
                })?;
                let client = ScramSha256::new(&config.user, password)?;
                let first = client.client_first_message();
                let bytes = messages::sasl_initial_response(SCRAM_SHA_256, &first);
                write_message(writer, bytes, server).await?;
                scram = Some(client);
            }
            ServerMessage::AuthenticationSaslContinue { data } => {
                let client = scram.as_mut().ok_or_else(|| {
                    Error::from(AuthenticationError::MalformedServerMessage(
                        "SASLContinue before SASLInitialResponse".into(),
                    ))
                })?;
                let final_msg = client.handle_server_first(&data)?;
                let bytes = messages::sasl_response(&final_msg);
                write_message(writer, bytes, server).await?;
            }
            ServerMessage::AuthenticationSaslFinal { data } => {
                let client = scram.as_ref().ok_or_else(|| {
                    Error::from(AuthenticationError::MalformedServerMessage(
                        "SASLFinal before SASLContinue".into(),
                    ))
                })?;
                client.verify_server_final(&data)?;
            }
            ServerMessage::ServerKeyData => {}
            ServerMessage::ParameterStatus { name, value } => settings.set_param(name, value),
            ServerMessage::LogMessage { severity, code, message } => {
                super::log_server_message(severity, code, &message);
            }
            ServerMessage::StateDataDescription { type_id, descriptor } => {
                state_descriptor = Some((type_id, descriptor));
            }
            ServerMessage::ErrorResponse { code, message, .. } => {
                return Err(Error::Server { code, message });
            }
            ServerMessage::ReadyForCommand { .. } => break,
            _ => {
                return Err(crate::errors::BinaryProtocolError::UnexpectedMessage {
                    tag: 0,
                    tag_char: '?',
                    state: "handshake",
                }
                .into());
            }
        }
    }

    Ok(HandshakeResult {
        negotiated_version: negotiated,
        settings,
        state_descriptor,
    })
}
