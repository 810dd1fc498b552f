//! Socket-owning protocol connection (C2, C3, C7) plus its supporting state.

pub mod handshake;
pub mod protocol_connection;
pub mod reader;
pub mod scram;
pub mod settings;
pub mod state;

pub use protocol_connection::Io;
pub use settings::ServerSettings;
pub use state::{BorrowState, ConnectionState};

/// Maps a `LogMessage`'s server-reported severity to a `log` level, per
/// §4.7's implementation note (`Notice` -> info, `Warning` -> warn,
/// `Error`/`Fatal`/`Panic` -> error). Severity is an ascending byte scale;
/// thresholds rather than exact matches tolerate the server adding
/// intermediate levels.
pub fn log_server_message(severity: u8, code: u32, message: &str) {
    const WARNING: u8 = 0x50;
    const ERROR: u8 = 0x64;
    if severity >= ERROR {
        log::error!("server log [{code:#010x}]: {message}");
    } else if severity >= WARNING {
        log::warn!("server log [{code:#010x}]: {message}");
    } else {
        log::info!("server log [{code:#010x}]: {message}");
    }
}
