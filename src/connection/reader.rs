//! Background reader loop (C2).
//!
//! Modeled on the teacher's pattern of a spawned task reading through a
//! buffered stream and publishing results over a bounded handoff channel.
//! Here the channel carries fully decoded [`ServerMessage`]s rather than
//! raw bytes, and has capacity 1 so the background never races ahead of a
//! foreground that has stopped asking — matching §4.2's back-pressure
//! requirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::{ClientConnectionError, Error, ServerIdentifier};
use crate::protocol::{parse_server_message, ServerMessage};

/// Shared with the foreground so the reader can tag a mid-read failure as
/// reconnect-eligible when the connection was last known to be idle
/// (supplemented idle-session-timeout detection, §4.8).
pub type IdleMarker = Arc<AtomicBool>;

pub fn new_idle_marker() -> IdleMarker {
    Arc::new(AtomicBool::new(false))
}

async fn read_one<R: AsyncReadExt + Unpin>(
    socket: &mut R,
) -> std::io::Result<(u8, Vec<u8>)> {
    let tag = socket.read_u8().await?;
    let len = socket.read_u32().await?;
    let body_len = (len as usize).saturating_sub(4);
    let mut body = vec![0u8; body_len];
    socket.read_exact(&mut body).await?;
    Ok((tag, body))
}

fn classify_io_error(err: std::io::Error, server: ServerIdentifier, was_idle: bool) -> Error {
    use std::io::ErrorKind::*;
    match err.kind() {
        UnexpectedEof => ClientConnectionError::Closed { server }.into(),
        ConnectionReset | ConnectionAborted | BrokenPipe if was_idle => {
            ClientConnectionError::Closed { server }.into()
        }
        ConnectionReset | ConnectionAborted | BrokenPipe => {
            ClientConnectionError::FailedTemporarily { server, source: err }.into()
        }
        TimedOut => ClientConnectionError::Timeout { server }.into(),
        _ => ClientConnectionError::Failed { server, source: err }.into(),
    }
}

/// Spawns the reader task. `socket` is the read half of the connection's
/// duplex stream; `tx` is the capacity-1 handoff channel the foreground
/// drains one message at a time.
pub fn spawn<R>(
    socket: R,
    tx: mpsc::Sender<Result<ServerMessage, Error>>,
    server: ServerIdentifier,
    idle: IdleMarker,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(socket);
        loop {
            let was_idle = idle.load(Ordering::Acquire);
            match read_one(&mut reader).await {
                Ok((tag, body)) => {
                    let parsed = parse_server_message(tag, &body);
                    let is_err = parsed.is_err();
                    log::trace!("reader loop decoded message tag {tag:#04x}");
                    if tx.send(parsed).await.is_err() || is_err {
                        break;
                    }
                }
                Err(io_err) => {
                    log::warn!("reader loop for {server} failed: {io_err}");
                    let _ = tx
                        .send(Err(classify_io_error(io_err, server.clone(), was_idle)))
                        .await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn id() -> ServerIdentifier {
        ServerIdentifier {
            host: "localhost".into(),
            port: 5656,
            database: "edgedb".into(),
            user: "edgedb".into(),
        }
    }

    #[tokio::test]
    async fn decodes_one_message_then_surfaces_eof_as_closed() {
        let mut wire = BytesMut::new();
        wire.put_u8(b'Z'); // ReadyForCommand
        wire.put_u32(4 + 2 + 1); // length includes itself
        wire.put_u16(0); // no headers
        wire.put_u8(b'I'); // idle

        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&wire).await.unwrap();
            server.shutdown().await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(1);
        let idle = new_idle_marker();
        idle.store(true, Ordering::Release);
        spawn(client, tx, id(), idle);

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            Ok(ServerMessage::ReadyForCommand { .. })
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            Err(Error::ClientConnection(ClientConnectionError::Closed { .. }))
        ));
    }
}
