//! Typed message builders (outbound) and parsed message representation
//! (inbound), sitting on top of the frame codec (C1).

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use super::constants::*;
use super::frame::{FrameReader, FrameWriter};
use super::types::{Cardinality, IoFormat, TransactionState};
use crate::errors::{BinaryProtocolError, Error};

/// Builds the `ClientHandshake` message (§4.3 step 1).
pub fn client_handshake(
    major: u16,
    minor: u16,
    params: &[(&str, &str)],
) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_CLIENT_HANDSHAKE, |buf| {
        FrameWriter::write_u16(buf, major);
        FrameWriter::write_u16(buf, minor);
        FrameWriter::write_u16(buf, params.len() as u16);
        // Sorted so the wire form is deterministic regardless of caller
        // iteration order, per §4.3.
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        for (key, value) in sorted {
            FrameWriter::write_str(buf, key);
            FrameWriter::write_str(buf, value);
        }
        FrameWriter::write_u16(buf, 0); // n_extensions
    });
    w.into_inner()
}

pub fn sasl_initial_response(mechanism: &str, client_first: &[u8]) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_SASL_INITIAL_RESPONSE, |buf| {
        FrameWriter::write_str(buf, mechanism);
        FrameWriter::write_bytes(buf, client_first);
    });
    w.into_inner()
}

pub fn sasl_response(client_final: &[u8]) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_SASL_RESPONSE, |buf| {
        FrameWriter::write_bytes(buf, client_final);
    });
    w.into_inner()
}

/// Headers commonly attached to `Parse`/`Execute`/`OptimisticExecute`.
pub struct ExecHeaders {
    pub allow_capabilities: u64,
    pub explicit_object_ids: bool,
}

fn write_exec_headers(buf: &mut BytesMut, headers: &ExecHeaders) {
    let cap_bytes = headers.allow_capabilities.to_be_bytes();
    let eoi_bytes = [1u8];
    let mut pairs: Vec<(u16, &[u8])> = vec![(HEADER_ALLOW_CAPABILITIES, &cap_bytes)];
    if headers.explicit_object_ids {
        pairs.push((HEADER_EXPLICIT_OBJECT_IDS, &eoi_bytes));
    }
    FrameWriter::write_headers(buf, &pairs);
}

/// `Parse` (≥1.x) / `Prepare` (≤0.x) — same tag and body shape (§4.5.2, §6).
pub fn parse_or_prepare(
    headers: &ExecHeaders,
    format: IoFormat,
    cardinality: Cardinality,
    command: &str,
) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_PARSE, |buf| {
        write_exec_headers(buf, headers);
        FrameWriter::write_u8(buf, format.as_wire_byte());
        FrameWriter::write_u8(buf, cardinality.as_wire_byte());
        FrameWriter::write_u32(buf, 0); // statement name, always anonymous
        FrameWriter::write_str(buf, command);
    });
    w.into_inner()
}

pub fn describe_statement() -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_DESCRIBE_STATEMENT, |buf| {
        FrameWriter::write_u16(buf, 0); // no headers
        FrameWriter::write_u8(buf, ASPECT_DATA_DESCRIPTION);
        FrameWriter::write_u32(buf, 0); // statement name
    });
    w.into_inner()
}

/// `Execute` for protocol ≤0.x: just headers, statement name, args (§6).
pub fn execute_v0(headers: &ExecHeaders, args: &[u8]) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_EXECUTE, |buf| {
        write_exec_headers(buf, headers);
        FrameWriter::write_u32(buf, 0);
        buf.extend_from_slice(args);
    });
    w.into_inner()
}

/// `Execute` for protocol ≥1.x, optionally carrying session state (≥2.0).
#[allow(clippy::too_many_arguments)]
pub fn execute_v1(
    headers: &ExecHeaders,
    format: IoFormat,
    cardinality: Cardinality,
    command: &str,
    in_desc_id: Uuid,
    out_desc_id: Uuid,
    state: Option<(Uuid, &[u8])>,
    args: &[u8],
) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_EXECUTE, |buf| {
        write_exec_headers(buf, headers);
        FrameWriter::write_u8(buf, format.as_wire_byte());
        FrameWriter::write_u8(buf, cardinality.as_wire_byte());
        FrameWriter::write_str(buf, command);
        FrameWriter::write_uuid(buf, in_desc_id);
        FrameWriter::write_uuid(buf, out_desc_id);
        if let Some((state_type_id, state_bytes)) = state {
            FrameWriter::write_uuid(buf, state_type_id);
            FrameWriter::write_bytes(buf, state_bytes);
        }
        buf.extend_from_slice(args);
    });
    w.into_inner()
}

/// `OptimisticExecute` (0.x only, §6).
pub fn optimistic_execute(
    headers: &ExecHeaders,
    format: IoFormat,
    cardinality: Cardinality,
    command: &str,
    in_desc_id: Uuid,
    out_desc_id: Uuid,
    args: &[u8],
) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_OPTIMISTIC_EXECUTE, |buf| {
        write_exec_headers(buf, headers);
        FrameWriter::write_u8(buf, format.as_wire_byte());
        FrameWriter::write_u8(buf, cardinality.as_wire_byte());
        FrameWriter::write_str(buf, command);
        FrameWriter::write_uuid(buf, in_desc_id);
        FrameWriter::write_uuid(buf, out_desc_id);
        buf.extend_from_slice(args);
    });
    w.into_inner()
}

pub fn execute_script(command: &str) -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_EXECUTE_SCRIPT, |buf| {
        FrameWriter::write_u16(buf, 0);
        FrameWriter::write_str(buf, command);
    });
    w.into_inner()
}

pub fn sync() -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_SYNC, |_buf| {});
    w.into_inner()
}

pub fn terminate() -> BytesMut {
    let mut w = FrameWriter::new();
    w.message(MSG_TERMINATE, |_buf| {});
    w.into_inner()
}

/// One fully-decoded inbound message. Owned (not borrowing the socket
/// buffer) so it can cross the reader-loop handoff channel (C2).
#[derive(Debug)]
pub enum ServerMessage {
    ServerHandshake {
        major: u16,
        minor: u16,
    },
    ServerKeyData,
    AuthenticationOk,
    AuthenticationSasl {
        mechanisms: Vec<String>,
    },
    AuthenticationSaslContinue {
        data: Bytes,
    },
    AuthenticationSaslFinal {
        data: Bytes,
    },
    ParameterStatus {
        name: String,
        value: Bytes,
    },
    LogMessage {
        severity: u8,
        code: u32,
        message: String,
    },
    ErrorResponse {
        severity: u8,
        code: u32,
        message: String,
    },
    ParseComplete {
        capabilities: u64,
        cardinality: Cardinality,
        input_type_id: Uuid,
        output_type_id: Uuid,
        /// Populated on protocol ≥1.x (`ProtocolFlavor::describe_is_inline`);
        /// `None` on 0.x, which requires a follow-up `DescribeStatement`.
        input_descriptor: Option<Bytes>,
        output_descriptor: Option<Bytes>,
    },
    CommandDataDescription {
        cardinality: Cardinality,
        input_type_id: Uuid,
        input_descriptor: Bytes,
        output_type_id: Uuid,
        output_descriptor: Bytes,
    },
    StateDataDescription {
        type_id: Uuid,
        descriptor: Bytes,
    },
    Data {
        chunk: Bytes,
    },
    CommandComplete {
        status: String,
    },
    ReadyForCommand {
        transaction_state: TransactionState,
    },
}

/// Parses one message given its tag and body. `expect_auth_status` carries
/// state needed to disambiguate `Authentication` sub-statuses.
pub fn parse_server_message(tag: u8, body: &[u8]) -> Result<ServerMessage, Error> {
    let mut r = FrameReader::new(tag, body);
    match tag {
        MSG_SERVER_HANDSHAKE => Ok(ServerMessage::ServerHandshake {
            major: r.read_u16()?,
            minor: r.read_u16()?,
        }),
        MSG_SERVER_KEY_DATA => {
            r.discard_rest();
            Ok(ServerMessage::ServerKeyData)
        }
        MSG_AUTHENTICATION => {
            let status = r.read_i32()?;
            match status {
                AUTH_OK => Ok(ServerMessage::AuthenticationOk),
                AUTH_SASL => {
                    let count = r.read_u32()?;
                    let mut mechanisms = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        mechanisms.push(r.read_str()?.to_owned());
                    }
                    Ok(ServerMessage::AuthenticationSasl { mechanisms })
                }
                AUTH_SASL_CONTINUE => Ok(ServerMessage::AuthenticationSaslContinue {
                    data: Bytes::copy_from_slice(r.read_bytes()?),
                }),
                AUTH_SASL_FINAL => Ok(ServerMessage::AuthenticationSaslFinal {
                    data: Bytes::copy_from_slice(r.read_bytes()?),
                }),
                other => Err(crate::errors::AuthenticationError::UnexpectedStatus(other).into()),
            }
        }
        MSG_PARAMETER_STATUS => Ok(ServerMessage::ParameterStatus {
            name: r.read_str()?.to_owned(),
            value: Bytes::copy_from_slice(r.read_bytes()?),
        }),
        MSG_LOG_MESSAGE => {
            let severity = r.read_u8()?;
            let code = r.read_u32()?;
            let message = r.read_str()?.to_owned();
            r.skip_headers()?;
            Ok(ServerMessage::LogMessage {
                severity,
                code,
                message,
            })
        }
        MSG_ERROR_RESPONSE => {
            let severity = r.read_u8()?;
            let code = r.read_u32()?;
            let message = r.read_str()?.to_owned();
            r.skip_headers()?;
            Ok(ServerMessage::ErrorResponse {
                severity,
                code,
                message,
            })
        }
        MSG_PARSE_COMPLETE => {
            let headers = r.read_headers()?;
            let capabilities = headers
                .iter()
                .find(|(key, _)| *key == HEADER_CAPABILITIES)
                .and_then(|(_, value)| value.get(0..8))
                .map(|bytes| u64::from_be_bytes(bytes.try_into().unwrap()))
                .unwrap_or(0);
            let cardinality = Cardinality::from_wire_byte(r.read_u8()?).ok_or_else(|| {
                Error::from(BinaryProtocolError::UnexpectedMessage {
                    tag,
                    tag_char: tag as char,
                    state: "ParseComplete cardinality",
                })
            })?;
            let input_type_id = r.read_uuid()?;
            let output_type_id = r.read_uuid()?;
            let has_descriptors = r.read_u8()? != 0;
            let (input_descriptor, output_descriptor) = if has_descriptors {
                (
                    Some(Bytes::copy_from_slice(r.read_bytes()?)),
                    Some(Bytes::copy_from_slice(r.read_bytes()?)),
                )
            } else {
                (None, None)
            };
            Ok(ServerMessage::ParseComplete {
                capabilities,
                cardinality,
                input_type_id,
                output_type_id,
                input_descriptor,
                output_descriptor,
            })
        }
        MSG_COMMAND_DATA_DESCRIPTION => {
            r.skip_headers()?;
            let cardinality = Cardinality::from_wire_byte(r.read_u8()?).ok_or_else(|| {
                Error::from(BinaryProtocolError::UnexpectedMessage {
                    tag,
                    tag_char: tag as char,
                    state: "CommandDataDescription cardinality",
                })
            })?;
            let input_type_id = r.read_uuid()?;
            let input_descriptor = Bytes::copy_from_slice(r.read_bytes()?);
            let output_type_id = r.read_uuid()?;
            let output_descriptor = Bytes::copy_from_slice(r.read_bytes()?);
            Ok(ServerMessage::CommandDataDescription {
                cardinality,
                input_type_id,
                input_descriptor,
                output_type_id,
                output_descriptor,
            })
        }
        MSG_STATE_DATA_DESCRIPTION => Ok(ServerMessage::StateDataDescription {
            type_id: r.read_uuid()?,
            descriptor: Bytes::copy_from_slice(r.read_bytes()?),
        }),
        MSG_DATA => {
            let count = r.read_u16()?;
            if count != 1 {
                return Err(BinaryProtocolError::DataElementCount(count as u32).into());
            }
            Ok(ServerMessage::Data {
                chunk: Bytes::copy_from_slice(r.read_bytes()?),
            })
        }
        MSG_COMMAND_COMPLETE => {
            r.skip_headers()?;
            Ok(ServerMessage::CommandComplete {
                status: r.read_str()?.to_owned(),
            })
        }
        MSG_READY_FOR_COMMAND => {
            r.skip_headers()?;
            let state_byte = r.read_u8()?;
            let transaction_state = TransactionState::from_wire_byte(state_byte).ok_or_else(|| {
                Error::from(BinaryProtocolError::UnexpectedMessage {
                    tag,
                    tag_char: tag as char,
                    state: "ReadyForCommand transaction state",
                })
            })?;
            Ok(ServerMessage::ReadyForCommand { transaction_state })
        }
        other => Err(BinaryProtocolError::UnexpectedMessage {
            tag: other,
            tag_char: other as char,
            state: "top-level dispatch",
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_handshake_sorts_params_and_is_parseable_by_a_reader() {
        let bytes = client_handshake(2, 0, &[("user", "u"), ("branch", "main")]);
        assert_eq!(bytes[0], MSG_CLIENT_HANDSHAKE);
        let mut r = FrameReader::new(bytes[0], &bytes[5..]);
        assert_eq!(r.read_u16().unwrap(), 2);
        assert_eq!(r.read_u16().unwrap(), 0);
        assert_eq!(r.read_u16().unwrap(), 2);
        // sorted: "branch" < "user"
        assert_eq!(r.read_str().unwrap(), "branch");
        assert_eq!(r.read_str().unwrap(), "main");
        assert_eq!(r.read_str().unwrap(), "user");
        assert_eq!(r.read_str().unwrap(), "u");
        assert_eq!(r.read_u16().unwrap(), 0);
    }

    #[test]
    fn data_message_rejects_element_count_other_than_one() {
        let mut buf = BytesMut::new();
        FrameWriter::write_u16(&mut buf, 2);
        let err = parse_server_message(MSG_DATA, &buf).unwrap_err();
        assert!(matches!(
            err,
            Error::BinaryProtocol(BinaryProtocolError::DataElementCount(2))
        ));
    }

    #[test]
    fn ready_for_command_reports_transaction_state() {
        let mut buf = BytesMut::new();
        FrameWriter::write_u16(&mut buf, 0); // no headers
        FrameWriter::write_u8(&mut buf, b'T');
        let msg = parse_server_message(MSG_READY_FOR_COMMAND, &buf).unwrap();
        assert!(matches!(
            msg,
            ServerMessage::ReadyForCommand {
                transaction_state: TransactionState::InTransaction
            }
        ));
    }
}
