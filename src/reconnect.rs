//! Reconnecting connection (C8, §4.8): wraps [`Io`] and transparently
//! re-dials on a `ShouldReconnect`-tagged failure, retrying the failed
//! operation exactly once against the fresh connection.

use std::future::Future;
use std::pin::Pin;

use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;

use crate::config::{tls, ConnectConfig};
use crate::connection::Io;
use crate::errors::{classify, ClientConnectionError, Error, ServerIdentifier};
use crate::protocol::ProtocolVersion;
use crate::utils::clock;

/// A socket that's either plaintext or TLS-wrapped, type-erased so the rest
/// of the stack doesn't need to be generic over it. `tokio`'s blanket
/// `AsyncRead`/`AsyncWrite` impls for `Box<T>` make this usable directly as
/// the `S` parameter of [`Io::connect`].
trait Socket: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Socket for T {}

/// A boxed, `'c`-scoped async operation against an [`Io`]. Callers supply
/// this instead of a plain `async fn` pointer because the operation needs
/// to run twice (original attempt, then once more against a fresh
/// connection) and borrows `io` each time.
pub type BoxedOp<'c, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'c>>;

async fn dial_once(config: &ConnectConfig, server: &ServerIdentifier) -> Result<Box<dyn Socket>, Error> {
    let connect = TcpStream::connect((config.host.as_str(), config.port));
    let stream = tokio::time::timeout(config.connect_timeout, connect)
        .await
        .map_err(|_| Error::from(ClientConnectionError::Timeout { server: server.clone() }))?
        .map_err(|e| ClientConnectionError::Failed { server: server.clone(), source: e })?;
    let _ = stream.set_nodelay(true);

    let connector = tls::build_connector(config.tls_ca_file.as_deref(), config.tls_verify_mode)?;
    let connector = TlsConnector::from(connector);
    let tls_stream = connector.connect(&config.host, stream).await.map_err(|e| {
        ClientConnectionError::Failed {
            server: server.clone(),
            source: std::io::Error::other(e),
        }
    })?;
    Ok(Box::new(tls_stream))
}

/// Dials, retrying on connection failure until `config.wait_until_available`
/// elapses (if set); a single attempt otherwise.
async fn dial_with_patience(config: &ConnectConfig, server: &ServerIdentifier) -> Result<Box<dyn Socket>, Error> {
    let Some(deadline_after) = config.wait_until_available else {
        return dial_once(config, server).await;
    };
    let start = clock::now();
    loop {
        match dial_once(config, server).await {
            Ok(socket) => return Ok(socket),
            Err(err) if start.elapsed() < deadline_after => {
                log::warn!("dial to {server} failed, retrying: {err}");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wraps an [`Io`], re-dialing on reconnect-eligible failures (§4.8).
pub struct Reconnecting {
    io: Io,
    config: ConnectConfig,
    min: ProtocolVersion,
    max: ProtocolVersion,
    server: ServerIdentifier,
}

impl Reconnecting {
    pub async fn connect(
        config: ConnectConfig,
        min: ProtocolVersion,
        max: ProtocolVersion,
    ) -> Result<Self, Error> {
        let server = ServerIdentifier {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            user: config.user.clone(),
        };
        let socket = dial_with_patience(&config, &server).await?;
        let io = Io::connect(socket, &config, min, max, server.clone()).await?;
        Ok(Self { io, config, min, max, server })
    }

    async fn redial(&mut self) -> Result<(), Error> {
        log::warn!("reconnecting to {}", self.server);
        let socket = dial_with_patience(&self.config, &self.server).await?;
        self.io = Io::connect(socket, &self.config, self.min, self.max, self.server.clone()).await?;
        Ok(())
    }

    pub fn server(&self) -> &ServerIdentifier {
        &self.server
    }

    pub fn io_mut(&mut self) -> &mut Io {
        &mut self.io
    }

    pub fn io(&self) -> &Io {
        &self.io
    }

    pub fn into_io(self) -> Io {
        self.io
    }

    /// Runs `op` against the live connection. On a `ShouldReconnect`-tagged
    /// failure, re-dials and runs `op` exactly once more; any other failure,
    /// or a second failure after reconnecting, is returned verbatim.
    pub async fn run<T>(&mut self, op: impl Fn(&mut Io) -> BoxedOp<'_, T>) -> Result<T, Error> {
        match op(&mut self.io).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let was_idle = self.io.was_idle();
                if classify(&err, was_idle).should_reconnect() {
                    log::warn!("operation on {} failed, reconnecting: {err}", self.server);
                    self.redial().await?;
                    op(&mut self.io).await
                } else {
                    Err(err)
                }
            }
        }
    }
}
