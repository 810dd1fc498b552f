//! Granular flow engine (C6): prepare/describe/execute with an optimistic
//! fast path, selected by the connection's negotiated [`ProtocolFlavor`].

use std::any::{Any, TypeId};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::cache::{CodecCaches, IdPair, QueryKey};
use crate::codec::{CodecBuilder, Decoder, Encoder, JsonBytesDecoder};
use crate::context::Context;
use crate::errors::{BinaryProtocolError, Error};
use crate::protocol::constants::*;
use crate::protocol::messages::ExecHeaders;
use crate::protocol::{messages, Cardinality, IoFormat, Language, ProtocolFlavor, ServerMessage};

use crate::connection::protocol_connection::Io;

/// One caller invocation (§3 "Query record"). Borrowed for the duration of
/// a single call; never shared across calls.
pub struct Query<'a> {
    pub command: &'a str,
    pub format: IoFormat,
    pub expected_cardinality: Cardinality,
    pub language: Language,
    pub args: &'a dyn Any,
    pub user_output_type: TypeId,
    pub in_transaction: bool,
    /// Session state (modules/aliases/config) to attach to every `Execute`
    /// on protocol ≥2.0 (§4.6). `&()` means "no override"; callers that
    /// never touch session state never pay for this.
    pub state: &'a dyn Any,
}

/// Decoded result of running one [`Query`] to completion.
pub struct QueryResult {
    pub rows: Vec<Box<dyn Any + Send>>,
    pub capabilities: u64,
}

fn capabilities_for(query: &Query) -> u64 {
    if query.in_transaction {
        TRANSACTION_CAPABILITIES
    } else {
        USER_CAPABILITIES
    }
}

/// Builds the `(state-type-id, encoded-bytes)` pair an `Execute` attaches
/// on ≥2.0 (§4.6), reusing the same `CodecBuilder::build_encoder` contract
/// query arguments already go through, just against the state descriptor
/// the handshake captured instead of a per-query input descriptor. `None`
/// on older protocols, which never carry state; a non-default state on one
/// of those is a caller error (`StateNotSupported`), not silently dropped.
fn attach_state(
    io: &Io,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
) -> Result<Option<(Uuid, BytesMut)>, Error> {
    let flavor = io.negotiated_version.flavor();
    if !flavor.carries_state() {
        return if query.state.is::<()>() {
            Ok(None)
        } else {
            Err(Error::StateNotSupported)
        };
    }
    let (state_type_id, descriptor) = io
        .state_descriptor
        .as_ref()
        .ok_or_else(|| Error::StateMismatch("no StateDataDescription from a >=2.0 handshake".into()))?;
    let encoder = builder.build_encoder(descriptor, io.negotiated_version)?;
    let mut bytes = BytesMut::new();
    encoder.encode(query.state, &mut bytes)?;
    Ok(Some((*state_type_id, bytes)))
}

fn build_decoder(
    builder: &dyn CodecBuilder,
    descriptor: &[u8],
    user_type: TypeId,
    format: IoFormat,
    version: crate::protocol::ProtocolVersion,
) -> Result<Arc<dyn Decoder>, Error> {
    if format == IoFormat::Json {
        return Ok(Arc::new(JsonBytesDecoder));
    }
    Ok(Arc::from(builder.build_decoder(descriptor, user_type, version)?))
}

/// Runs `query` to completion against `io`, using `caches`/`builder` to
/// pick the optimistic or pessimistic path (§4.5.1).
pub async fn run(
    io: &mut Io,
    ctx: &Context,
    caches: &CodecCaches,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
) -> Result<QueryResult, Error> {
    let key = QueryKey::new(
        query.command,
        query.format,
        query.expected_cardinality,
        query.user_output_type,
        query.language,
    );

    let ids = caches.get_ids(&key);
    let version = io.negotiated_version;
    let flavor = version.flavor();

    let encoder = ids.and_then(|ids| caches.get_encoder(ids.input, version));
    let decoder = ids.and_then(|ids| caches.get_decoder(ids.output, query.user_output_type, version));

    let result = match (ids, encoder, decoder) {
        (Some(ids), Some(encoder), Some(decoder)) => {
            log::trace!("flow engine: optimistic path for {:?}", query.command);
            optimistic(io, ctx, caches, builder, query, &key, ids, encoder, decoder).await?
        }
        _ => {
            log::trace!("flow engine: pessimistic path for {:?}", query.command);
            pessimistic(io, ctx, caches, builder, query, &key).await?
        }
    };

    Ok(result)
}

struct Prepared {
    ids: IdPair,
    capabilities: u64,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
}

async fn pessimistic(
    io: &mut Io,
    ctx: &Context,
    caches: &CodecCaches,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
    key: &QueryKey,
) -> Result<QueryResult, Error> {
    let prepared = prepare(io, ctx, caches, builder, query, key).await?;
    execute_with_args(io, ctx, builder, query, &prepared, false).await
}

#[allow(clippy::too_many_arguments)]
async fn optimistic(
    io: &mut Io,
    ctx: &Context,
    caches: &CodecCaches,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
    key: &QueryKey,
    ids: IdPair,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
) -> Result<QueryResult, Error> {
    let capabilities = caches.get_capabilities(key).unwrap_or_else(|| capabilities_for(query));
    let version = io.negotiated_version;
    let flavor = version.flavor();
    let headers = ExecHeaders {
        allow_capabilities: capabilities,
        explicit_object_ids: true,
    };

    let mut args = BytesMut::new();
    encoder.encode(query.args, &mut args)?;

    let frame = if matches!(flavor, ProtocolFlavor::V0) {
        messages::optimistic_execute(
            &headers,
            query.format,
            query.expected_cardinality,
            query.command,
            ids.input,
            ids.output,
            &args,
        )
    } else {
        let state = attach_state(io, builder, query)?;
        messages::execute_v1(
            &headers,
            query.format,
            query.expected_cardinality,
            query.command,
            ids.input,
            ids.output,
            state.as_ref().map(|(id, bytes)| (*id, bytes.as_ref())),
            &args,
        )
    };
    io.current_decoder = Some(decoder.clone());
    io.send_and_sync(ctx, frame).await?;

    let outcome = drain_until_ready(io, ctx).await?;
    match outcome {
        Outcome::Rows(rows) => {
            enforce_cardinality(query, rows.len())?;
            Ok(QueryResult { rows, capabilities })
        }
        Outcome::FreshDescriptors {
            input_type_id,
            input_descriptor,
            output_type_id,
            output_descriptor,
            cardinality,
            capabilities: fresh_caps,
        } => {
            let new_ids = IdPair { input: input_type_id, output: output_type_id };
            let new_encoder: Arc<dyn Encoder> =
                Arc::from(builder.build_encoder(&input_descriptor, version)?);
            let new_decoder = build_decoder(
                builder,
                &output_descriptor,
                query.user_output_type,
                query.format,
                version,
            )?;
            caches.put_ids(key.clone(), new_ids);
            caches.put_encoder(new_ids.input, new_encoder.clone(), version);
            caches.put_decoder(new_ids.output, query.user_output_type, new_decoder.clone(), version);
            caches.put_capabilities(key.clone(), fresh_caps);

            if !flavor.optimistic_retries() {
                // 0.x: the server already executed against the fresh
                // descriptors in the same round; just drain the rest.
                io.current_decoder = Some(new_decoder.clone());
                let rows = drain_rows_only(io, ctx, cardinality).await?;
                enforce_cardinality(query, rows.len())?;
                return Ok(QueryResult { rows, capabilities: fresh_caps });
            }

            // 1.x+: retry exactly once against the fresh descriptors.
            let prepared = Prepared {
                ids: new_ids,
                capabilities: fresh_caps,
                encoder: new_encoder,
                decoder: new_decoder,
            };
            execute_with_args(io, ctx, builder, query, &prepared, true).await
        }
    }
}

async fn prepare(
    io: &mut Io,
    ctx: &Context,
    caches: &CodecCaches,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
    key: &QueryKey,
) -> Result<Prepared, Error> {
    let capabilities = capabilities_for(query);
    let headers = ExecHeaders {
        allow_capabilities: capabilities,
        explicit_object_ids: true,
    };
    let version = io.negotiated_version;
    let flavor = version.flavor();

    let frame = messages::parse_or_prepare(&headers, query.format, query.expected_cardinality, query.command);
    io.send(ctx, frame).await?;
    if !flavor.describe_is_inline() {
        io.send_and_sync(ctx, messages::describe_statement()).await?;
    } else {
        io.sync(ctx).await?;
    }

    let mut parsed_ids = None;
    let mut parsed_caps = capabilities;
    let mut descriptors: Option<(Bytes, Bytes)> = None;

    loop {
        match io.recv(ctx).await? {
            ServerMessage::ParseComplete {
                capabilities,
                cardinality,
                input_type_id,
                output_type_id,
                input_descriptor,
                output_descriptor,
            } => {
                parsed_ids = Some((input_type_id, output_type_id));
                parsed_caps = capabilities;
                let _ = cardinality;
                if let (Some(i), Some(o)) = (input_descriptor, output_descriptor) {
                    descriptors = Some((i, o));
                }
            }
            ServerMessage::CommandDataDescription {
                input_type_id,
                input_descriptor,
                output_type_id,
                output_descriptor,
                ..
            } => {
                parsed_ids = Some((input_type_id, output_type_id));
                descriptors = Some((input_descriptor, output_descriptor));
            }
            ServerMessage::ReadyForCommand { .. } => break,
            ServerMessage::ErrorResponse { code, message, .. } => {
                drain_ready_after_error(io, ctx).await?;
                return Err(Error::Server { code, message });
            }
            ServerMessage::ParameterStatus { name, value } => io.settings.set_param(name, value),
            ServerMessage::LogMessage { severity, code, message } => {
                crate::connection::log_server_message(severity, code, &message)
            }
            _ => return Err(unexpected("prepare")),
        }
    }

    let (input_id, output_id) = parsed_ids.ok_or(Error::BinaryProtocol(BinaryProtocolError::UnexpectedDescriptorRefresh))?;
    let (input_descriptor, output_descriptor) =
        descriptors.ok_or(Error::BinaryProtocol(BinaryProtocolError::UnexpectedDescriptorRefresh))?;

    let encoder: Arc<dyn Encoder> = Arc::from(builder.build_encoder(&input_descriptor, version)?);
    let decoder = build_decoder(builder, &output_descriptor, query.user_output_type, query.format, version)?;

    let ids = IdPair { input: input_id, output: output_id };
    caches.put_ids(key.clone(), ids);
    caches.put_encoder(ids.input, encoder.clone(), version);
    caches.put_decoder(ids.output, query.user_output_type, decoder.clone(), version);
    caches.put_capabilities(key.clone(), parsed_caps);

    Ok(Prepared { ids, capabilities: parsed_caps, encoder, decoder })
}

async fn execute_with_args(
    io: &mut Io,
    ctx: &Context,
    builder: &dyn CodecBuilder,
    query: &Query<'_>,
    prepared: &Prepared,
    already_retried: bool,
) -> Result<QueryResult, Error> {
    let version = io.negotiated_version;
    let flavor = version.flavor();
    let headers = ExecHeaders {
        allow_capabilities: prepared.capabilities,
        explicit_object_ids: true,
    };

    let mut args = BytesMut::new();
    prepared.encoder.encode(query.args, &mut args)?;

    let frame = if matches!(flavor, ProtocolFlavor::V0) {
        messages::execute_v0(&headers, &args)
    } else {
        let state = attach_state(io, builder, query)?;
        messages::execute_v1(
            &headers,
            query.format,
            query.expected_cardinality,
            query.command,
            prepared.ids.input,
            prepared.ids.output,
            state.as_ref().map(|(id, bytes)| (*id, bytes.as_ref())),
            &args,
        )
    };
    io.current_decoder = Some(prepared.decoder.clone());
    io.send_and_sync(ctx, frame).await?;

    match drain_until_ready(io, ctx).await? {
        Outcome::Rows(rows) => {
            enforce_cardinality(query, rows.len())?;
            Ok(QueryResult { rows, capabilities: prepared.capabilities })
        }
        Outcome::FreshDescriptors { .. } => {
            // Already retried once against the other path's fresh
            // descriptors (or this call never expected a refresh at all);
            // a second one means the server keeps invalidating.
            let _ = already_retried;
            Err(Error::BinaryProtocol(BinaryProtocolError::UnexpectedDescriptorRefresh))
        }
    }
}

/// What draining the response stream produced.
enum Outcome {
    Rows(Vec<Box<dyn Any + Send>>),
    FreshDescriptors {
        input_type_id: Uuid,
        input_descriptor: Bytes,
        output_type_id: Uuid,
        output_descriptor: Bytes,
        cardinality: Cardinality,
        capabilities: u64,
    },
}

/// Drains messages until `ReadyForCommand`, decoding `Data` rows with
/// whatever decoder is in scope and surfacing a mid-stream descriptor
/// refresh as a distinct outcome (§4.5.3 step 3).
async fn drain_until_ready(io: &mut Io, ctx: &Context) -> Result<Outcome, Error> {
    let mut rows: Vec<Box<dyn Any + Send>> = Vec::new();
    loop {
        match io.recv(ctx).await? {
            ServerMessage::Data { chunk } => {
                let decoder = io.current_decoder.clone().expect("decoder set before draining");
                rows.push(decoder.decode(&chunk)?);
            }
            ServerMessage::CommandComplete { .. } => {}
            ServerMessage::ReadyForCommand { .. } => return Ok(Outcome::Rows(rows)),
            ServerMessage::CommandDataDescription {
                cardinality,
                input_type_id,
                input_descriptor,
                output_type_id,
                output_descriptor,
            } => {
                return Ok(Outcome::FreshDescriptors {
                    input_type_id,
                    input_descriptor,
                    output_type_id,
                    output_descriptor,
                    cardinality,
                    capabilities: 0,
                })
            }
            ServerMessage::ParseComplete {
                capabilities,
                cardinality,
                input_type_id,
                output_type_id,
                input_descriptor,
                output_descriptor,
            } => {
                let (input_descriptor, output_descriptor) = match (input_descriptor, output_descriptor) {
                    (Some(i), Some(o)) => (i, o),
                    _ => return Err(unexpected("mid-stream ParseComplete without descriptors")),
                };
                return Ok(Outcome::FreshDescriptors {
                    input_type_id,
                    input_descriptor,
                    output_type_id,
                    output_descriptor,
                    cardinality,
                    capabilities,
                })
            }
            ServerMessage::ErrorResponse { code, message, .. } => {
                drain_ready_after_error(io, ctx).await?;
                return Err(Error::Server { code, message });
            }
            ServerMessage::ParameterStatus { name, value } => io.settings.set_param(name, value),
            ServerMessage::LogMessage { severity, code, message } => {
                crate::connection::log_server_message(severity, code, &message)
            }
            _ => return Err(unexpected("execute")),
        }
    }
}

async fn drain_rows_only(
    io: &mut Io,
    ctx: &Context,
    _expected_cardinality: Cardinality,
) -> Result<Vec<Box<dyn Any + Send>>, Error> {
    match drain_until_ready(io, ctx).await? {
        Outcome::Rows(rows) => Ok(rows),
        Outcome::FreshDescriptors { .. } => {
            Err(Error::BinaryProtocol(BinaryProtocolError::UnexpectedDescriptorRefresh))
        }
    }
}

/// After an `ErrorResponse`, the wire must still be drained to
/// `ReadyForCommand` before the connection is usable again (§4.5.6, §7).
async fn drain_ready_after_error(io: &mut Io, ctx: &Context) -> Result<(), Error> {
    loop {
        match io.recv(ctx).await? {
            ServerMessage::ReadyForCommand { .. } => return Ok(()),
            ServerMessage::ParameterStatus { name, value } => io.settings.set_param(name, value),
            _ => {}
        }
    }
}

fn enforce_cardinality(query: &Query<'_>, actual_rows: usize) -> Result<(), Error> {
    let actual = if actual_rows > 1 { Cardinality::Many } else { Cardinality::AtMostOne };
    if !query.expected_cardinality.admits(actual) {
        return Err(Error::ResultCardinalityMismatch {
            expected: query.expected_cardinality,
            actual: Cardinality::Many,
        });
    }
    if matches!(query.expected_cardinality, Cardinality::AtMostOne) && actual_rows == 0 {
        return Err(Error::NoData);
    }
    Ok(())
}

fn unexpected(state: &'static str) -> Error {
    BinaryProtocolError::UnexpectedMessage { tag: 0, tag_char: '?', state }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CodecCaches;
    use crate::config::ConnectConfig;
    use crate::errors::ServerIdentifier;
    use crate::ops;
    use crate::protocol::{FrameWriter, ProtocolVersion};

    #[derive(Debug)]
    struct NoArgsEncoder;

    impl Encoder for NoArgsEncoder {
        fn encode(&self, _args: &dyn Any, _out: &mut BytesMut) -> Result<(), Error> {
            Ok(())
        }
    }

    struct NoopCodecBuilder;

    impl CodecBuilder for NoopCodecBuilder {
        fn build_encoder(&self, _descriptor: &[u8], _version: ProtocolVersion) -> Result<Box<dyn Encoder>, Error> {
            Ok(Box::new(NoArgsEncoder))
        }

        fn build_decoder(
            &self,
            _descriptor: &[u8],
            _user_type: TypeId,
            _version: ProtocolVersion,
        ) -> Result<Box<dyn Decoder>, Error> {
            unreachable!("test query runs with IoFormat::Json, which never calls build_decoder")
        }
    }

    fn test_server() -> ServerIdentifier {
        ServerIdentifier {
            host: "localhost".into(),
            port: 5656,
            database: "main".into(),
            user: "edgedb".into(),
        }
    }

    fn server_message(tag: u8, body: impl FnOnce(&mut BytesMut)) -> BytesMut {
        let mut w = FrameWriter::new();
        w.message(tag, body);
        w.into_inner()
    }

    /// Full pessimistic round trip for a `query_single_json`-shaped call:
    /// handshake, `Parse`/`Sync` answered with a `ParseComplete` carrying
    /// inline descriptors (protocol 1.x), then `Execute`/`Sync` answered
    /// with one `Data` chunk.
    #[tokio::test]
    async fn run_pessimistic_query_single_json_round_trip() {
        use tokio::io::AsyncWriteExt;

        let (client_socket, mut server_socket) = tokio::io::duplex(1 << 20);

        let mut script = BytesMut::new();
        script.extend_from_slice(&server_message(MSG_SERVER_HANDSHAKE, |buf| {
            FrameWriter::write_u16(buf, 1);
            FrameWriter::write_u16(buf, 0);
        }));
        script.extend_from_slice(&server_message(MSG_AUTHENTICATION, |buf| {
            FrameWriter::write_u32(buf, AUTH_OK as u32);
        }));
        script.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
            FrameWriter::write_headers(buf, &[]);
            FrameWriter::write_u8(buf, b'I');
        }));
        script.extend_from_slice(&server_message(MSG_PARSE_COMPLETE, |buf| {
            FrameWriter::write_headers(buf, &[]);
            FrameWriter::write_u8(buf, Cardinality::AtMostOne.as_wire_byte());
            FrameWriter::write_uuid(buf, Uuid::nil());
            FrameWriter::write_uuid(buf, Uuid::nil());
            FrameWriter::write_u8(buf, 1);
            FrameWriter::write_bytes(buf, b"input-descriptor");
            FrameWriter::write_bytes(buf, b"output-descriptor");
        }));
        script.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
            FrameWriter::write_headers(buf, &[]);
            FrameWriter::write_u8(buf, b'I');
        }));
        script.extend_from_slice(&server_message(MSG_DATA, |buf| {
            FrameWriter::write_u16(buf, 1);
            FrameWriter::write_bytes(buf, b"{\"ok\":true}");
        }));
        script.extend_from_slice(&server_message(MSG_COMMAND_COMPLETE, |buf| {
            FrameWriter::write_headers(buf, &[]);
            FrameWriter::write_str(buf, "SELECT");
        }));
        script.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
            FrameWriter::write_headers(buf, &[]);
            FrameWriter::write_u8(buf, b'I');
        }));

        let driver = tokio::spawn(async move {
            server_socket.write_all(&script).await.unwrap();
            server_socket.flush().await.unwrap();
            // Keep the handle alive until the test is done reading.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let config = ConnectConfig::new("localhost", 5656, "edgedb", "main");
        let mut io = Io::connect(
            client_socket,
            &config,
            ProtocolVersion::new(1, 0),
            ProtocolVersion::new(1, 0),
            test_server(),
        )
        .await
        .expect("handshake should complete");

        let caches = CodecCaches::new(16);
        let builder = NoopCodecBuilder;
        let query = ops::query_single_json_shape("select 1", &(), false);

        let result = run(&mut io, &Context::none(), &caches, &builder, &query)
            .await
            .expect("query should succeed");
        assert_eq!(result.rows.len(), 1);
        let row = result.rows[0].downcast_ref::<Bytes>().unwrap();
        assert_eq!(&row[..], b"{\"ok\":true}");

        driver.await.unwrap();
    }
}
