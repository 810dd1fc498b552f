//! Drives the frame codec and flow engine end to end against an in-process
//! mock socket (`tokio::io::duplex`), the way `src/flow/mod.rs`'s own
//! `#[cfg(test)]` module already does for a single scenario — this extends
//! the same pattern to scenarios that cut across module boundaries rather
//! than one module's internals.

use std::any::{Any, TypeId};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use gel_client_core::cache::CodecCaches;
use gel_client_core::codec::{CodecBuilder, Decoder, Encoder};
use gel_client_core::config::ConnectConfig;
use gel_client_core::connection::Io;
use gel_client_core::context::Context;
use gel_client_core::errors::{Error, ServerIdentifier};
use gel_client_core::flow::{self, Query};
use gel_client_core::protocol::constants::*;
use gel_client_core::protocol::{Cardinality, FrameWriter, IoFormat, Language, ProtocolVersion};

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
        unreachable!("every query in this file runs with IoFormat::Json, which never calls build_decoder")
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

fn trust_auth_handshake(version: (u16, u16)) -> BytesMut {
    let mut script = BytesMut::new();
    script.extend_from_slice(&server_message(MSG_SERVER_HANDSHAKE, |buf| {
        FrameWriter::write_u16(buf, version.0);
        FrameWriter::write_u16(buf, version.1);
    }));
    script.extend_from_slice(&server_message(MSG_AUTHENTICATION, |buf| {
        FrameWriter::write_u32(buf, AUTH_OK as u32);
    }));
    script.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
        FrameWriter::write_headers(buf, &[]);
        FrameWriter::write_u8(buf, b'I');
    }));
    script
}

async fn connect_over_duplex(version: (u16, u16)) -> (Io, tokio::io::DuplexStream) {
    let (client_socket, mut server_socket) = tokio::io::duplex(1 << 20);
    server_socket
        .write_all(&trust_auth_handshake(version))
        .await
        .unwrap();
    server_socket.flush().await.unwrap();

    let config = ConnectConfig::new("localhost", 5656, "edgedb", "main");
    let io = Io::connect(
        client_socket,
        &config,
        ProtocolVersion::new(version.0, version.1),
        ProtocolVersion::new(version.0, version.1),
        test_server(),
    )
    .await
    .expect("handshake should complete over Trust auth");
    (io, server_socket)
}

fn query<'a>(command: &'a str) -> Query<'a> {
    Query {
        command,
        format: IoFormat::Json,
        expected_cardinality: Cardinality::AtMostOne,
        language: Language::EdgeQL,
        args: &(),
        user_output_type: TypeId::of::<Bytes>(),
        in_transaction: false,
        state: &(),
    }
}

/// Pessimistic path (Parse/Describe/Sync, then Execute/Sync) on a fresh
/// connection with nothing in the descriptor cache yet.
#[tokio::test]
async fn pessimistic_path_decodes_a_single_row() {
    let (mut io, mut server_socket) = connect_over_duplex((1, 0)).await;

    let mut script = BytesMut::new();
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
        FrameWriter::write_bytes(buf, b"{\"n\":1}");
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
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let caches = CodecCaches::new(16);
    let builder = NoopCodecBuilder;
    let q = query("select {n := 1}");

    let result = flow::run(&mut io, &Context::none(), &caches, &builder, &q)
        .await
        .expect("query should succeed");
    assert_eq!(result.rows.len(), 1);
    let row = result.rows[0].downcast_ref::<Bytes>().unwrap();
    assert_eq!(&row[..], b"{\"n\":1}");

    driver.await.unwrap();
}

/// A server `ErrorResponse` must be fully drained to `ReadyForCommand`
/// before the connection can run another query, and is surfaced as
/// `Error::Server` rather than any binary-protocol violation.
#[tokio::test]
async fn server_error_drains_to_ready_and_surfaces_as_server_error() {
    let (mut io, mut server_socket) = connect_over_duplex((1, 0)).await;

    let mut script = BytesMut::new();
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
    script.extend_from_slice(&server_message(MSG_ERROR_RESPONSE, |buf| {
        FrameWriter::write_u8(buf, 0);
        FrameWriter::write_u32(buf, 0x0100_0000);
        FrameWriter::write_str(buf, "SELECT 1 2 3");
        FrameWriter::write_headers(buf, &[]);
    }));
    script.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
        FrameWriter::write_headers(buf, &[]);
        FrameWriter::write_u8(buf, b'I');
    }));

    let driver = tokio::spawn(async move {
        server_socket.write_all(&script).await.unwrap();
        server_socket.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let caches = CodecCaches::new(16);
    let builder = NoopCodecBuilder;
    let q = query("select 1 2 3");

    let err = flow::run(&mut io, &Context::none(), &caches, &builder, &q)
        .await
        .expect_err("malformed query should surface a server error");
    assert!(matches!(err, Error::Server { code: 0x0100_0000, .. }));
    assert!(io.was_idle(), "draining ErrorResponse must leave the connection ready again");

    driver.await.unwrap();
}

/// `ctx.race` cancels a query whose response never arrives, the mechanism
/// the pool relies on to time out a stuck connection instead of hanging
/// forever (§5).
#[tokio::test]
async fn deadline_cancels_a_stalled_recv() {
    let (mut io, _server_socket) = connect_over_duplex((1, 0)).await;

    let caches = CodecCaches::new(16);
    let builder = NoopCodecBuilder;
    let q = query("select 1");
    let ctx = Context::with_timeout(std::time::Duration::from_millis(20));

    let err = flow::run(&mut io, &ctx, &caches, &builder, &q)
        .await
        .expect_err("no response ever arrives, so this must time out");
    assert!(matches!(err, Error::Cancelled));
}
