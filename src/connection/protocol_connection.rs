//! The socket-owning protocol connection (C7): dials, runs the handshake,
//! and afterwards exposes the send/sync/recv primitives the flow engine (C6)
//! and transaction layer (C11) drive a connection through.
//!
//! Grounded on the teacher's split-socket pattern (`server::Server` keeps a
//! write half for the foreground and hands the read half to a spawned
//! reader task): here the write half lives behind `Io` directly and the read
//! half is owned by [`reader::spawn`], the two talking over the capacity-1
//! handoff channel from C2.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::handshake;
use super::reader::{self, IdleMarker};
use super::settings::ServerSettings;
use crate::codec::Decoder;
use crate::config::ConnectConfig;
use crate::context::Context;
use crate::errors::{ClientConnectionError, Error, ServerIdentifier};
use crate::protocol::messages;
use crate::protocol::{ProtocolVersion, ServerMessage};

/// An open, handshaken connection to a server. Not `Clone`; ownership moves
/// through the pool's `Object` wrapper (C10) and the reconnect wrapper (C8).
pub struct Io {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    rx: mpsc::Receiver<Result<ServerMessage, Error>>,
    reader_task: JoinHandle<()>,
    idle: IdleMarker,
    server: ServerIdentifier,

    pub negotiated_version: ProtocolVersion,
    pub settings: ServerSettings,
    /// State-type descriptor handed out at handshake time (≥2.0 only);
    /// `None` on earlier protocol flavors.
    pub state_descriptor: Option<(Uuid, Bytes)>,
    /// Decoder for whatever query is currently in flight. The flow engine
    /// sets this immediately before sending an `Execute`/`OptimisticExecute`
    /// and before the first `recv()` that might return `Data`; nothing else
    /// touches it.
    pub current_decoder: Option<Arc<dyn Decoder>>,
}

impl Io {
    /// Runs the full dial sequence: splits `socket`, spawns the reader loop,
    /// then drives the handshake (C3) to completion.
    pub async fn connect<S>(
        socket: S,
        config: &ConnectConfig,
        min: ProtocolVersion,
        max: ProtocolVersion,
        server: ServerIdentifier,
    ) -> Result<Self, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(socket);
        let (tx, mut rx) = mpsc::channel(1);
        let idle = reader::new_idle_marker();
        let reader_task = reader::spawn(read_half, tx, server.clone(), idle.clone());

        let mut writer: Box<dyn AsyncWrite + Unpin + Send> = Box::new(write_half);
        let result = handshake::perform(&mut writer, &mut rx, config, min, max, &server).await?;
        idle.store(true, std::sync::atomic::Ordering::Release);

        Ok(Self {
            writer,
            rx,
            reader_task,
            idle,
            server,
            negotiated_version: result.negotiated_version,
            settings: result.settings,
            state_descriptor: result.state_descriptor,
            current_decoder: None,
        })
    }

    /// Writes one frame and flushes it, racing both against `ctx`'s deadline
    /// (§5; grounded on the teacher's `send_and_flush_timeout`, which applies
    /// its timeout directly around the socket write rather than at some
    /// earlier queueing step). Marks the connection non-idle: a request is
    /// now outstanding.
    pub async fn send(&mut self, ctx: &Context, frame: BytesMut) -> Result<(), Error> {
        self.idle.store(false, std::sync::atomic::Ordering::Release);
        ctx.race(self.writer.write_all(&frame)).await?.map_err(|e| {
            ClientConnectionError::Failed {
                server: self.server.clone(),
                source: e,
            }
        })?;
        ctx.race(self.writer.flush()).await?.map_err(|e| {
            ClientConnectionError::Failed {
                server: self.server.clone(),
                source: e,
            }
            .into()
        })
    }

    /// Sends a `Sync` message on its own.
    pub async fn sync(&mut self, ctx: &Context) -> Result<(), Error> {
        self.send(ctx, messages::sync()).await
    }

    /// Sends `frame` immediately followed by `Sync`, the shape every
    /// granular-flow round trip uses (§4.5.2-§4.5.3).
    pub async fn send_and_sync(&mut self, ctx: &Context, frame: BytesMut) -> Result<(), Error> {
        self.send(ctx, frame).await?;
        self.sync(ctx).await
    }

    /// Receives the next decoded message from the reader loop, raced against
    /// `ctx`'s deadline. Marks the connection idle again once a
    /// `ReadyForCommand` closes out the round trip, so a later I/O failure
    /// while genuinely idle is classified as a clean close rather than a
    /// mid-request failure (§4.8).
    pub async fn recv(&mut self, ctx: &Context) -> Result<ServerMessage, Error> {
        let msg = ctx
            .race(self.rx.recv())
            .await?
            .unwrap_or_else(|| Err(ClientConnectionError::Closed { server: self.server.clone() }.into()))?;
        if matches!(msg, ServerMessage::ReadyForCommand { .. }) {
            self.idle.store(true, std::sync::atomic::Ordering::Release);
        }
        Ok(msg)
    }

    /// Best-effort `Terminate` plus reader-task teardown. Errors writing the
    /// terminate message are swallowed: the connection is going away either
    /// way (§4.9).
    pub async fn close(mut self) {
        let _ = self.send(&Context::none(), messages::terminate()).await;
        self.reader_task.abort();
    }

    pub fn server(&self) -> &ServerIdentifier {
        &self.server
    }

    /// Whether no request was outstanding the last time this connection's
    /// state was observed. Used by the reconnect wrapper (C8) to classify a
    /// failure the same way the reader loop already did (§4.8).
    pub fn was_idle(&self) -> bool {
        self.idle.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::protocol::constants::*;
    use crate::protocol::FrameWriter;

    fn test_config() -> ConnectConfig {
        ConnectConfig::new("localhost", 5656, "edgedb", "main")
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

    /// Drives `Io::connect` through a Trust-auth handshake (no SCRAM) over
    /// an in-memory duplex pair, mirroring the client-handshake byte shapes
    /// `handshake::perform` expects.
    #[tokio::test]
    async fn connect_completes_trust_auth_handshake_over_duplex() {
        let (client_socket, mut server_socket) = tokio::io::duplex(4096);

        let driver = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            // Drain the client handshake message the server doesn't need to
            // inspect for a Trust-auth exchange.
            let mut tag = [0u8; 1];
            server_socket.read_exact(&mut tag).await.unwrap();
            let mut len_bytes = [0u8; 4];
            server_socket.read_exact(&mut len_bytes).await.unwrap();
            let len = u32::from_be_bytes(len_bytes) as usize - 4;
            let mut body = vec![0u8; len];
            server_socket.read_exact(&mut body).await.unwrap();

            let mut reply = BytesMut::new();
            reply.extend_from_slice(&server_message(MSG_SERVER_HANDSHAKE, |buf| {
                FrameWriter::write_u16(buf, 1);
                FrameWriter::write_u16(buf, 0);
            }));
            reply.extend_from_slice(&server_message(MSG_AUTHENTICATION, |buf| {
                FrameWriter::write_u32(buf, AUTH_OK as u32);
            }));
            reply.extend_from_slice(&server_message(MSG_PARAMETER_STATUS, |buf| {
                FrameWriter::write_str(buf, "suggested_pool_concurrency");
                FrameWriter::write_bytes(buf, b"4");
            }));
            reply.extend_from_slice(&server_message(MSG_READY_FOR_COMMAND, |buf| {
                FrameWriter::write_headers(buf, &[]);
                FrameWriter::write_u8(buf, b'I');
            }));
            server_socket.write_all(&reply).await.unwrap();
            server_socket.flush().await.unwrap();
            server_socket
        });

        let config = test_config();
        let io = Io::connect(
            client_socket,
            &config,
            ProtocolVersion::new(0, 0),
            ProtocolVersion::new(1, 0),
            test_server(),
        )
        .await
        .expect("handshake should complete over Trust auth");

        assert_eq!(io.negotiated_version, ProtocolVersion::new(1, 0));
        assert_eq!(io.settings.get("suggested_pool_concurrency").map(|v| v.as_ref()), Some(&b"4"[..]));
        assert!(io.was_idle());

        driver.await.unwrap();
    }
}
