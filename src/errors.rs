//! Error taxonomy for the protocol core.
//!
//! Errors are grouped the way the teacher's error module groups them: one
//! top-level enum of variants, most `#[from]`-derived from a narrower
//! sub-enum, a few carrying an identifier for log correlation. Retry and
//! reconnect eligibility are tags orthogonal to the variant, not separate
//! kinds (see [`ErrorTags`]).

use std::fmt;
use std::io;

/// Identifies a protocol connection in logs (host, port, database, user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentifier {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl fmt::Display for ServerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ user: {}, database: {}, addr: {}:{} }}",
            self.user, self.database, self.host, self.port
        )
    }
}

/// Why a [`Error::ClientConnectionError`] happened.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectionError {
    #[error("failed to connect to {server}: {source}")]
    Failed {
        server: ServerIdentifier,
        #[source]
        source: io::Error,
    },
    #[error("temporarily failed to connect to {server}: {source}")]
    FailedTemporarily {
        server: ServerIdentifier,
        #[source]
        source: io::Error,
    },
    #[error("i/o deadline exceeded talking to {server}")]
    Timeout { server: ServerIdentifier },
    #[error("connection to {server} is closed")]
    Closed { server: ServerIdentifier },
}

/// Framing and message-shape violations. Every variant poisons the
/// connection per the propagation policy.
#[derive(Debug, thiserror::Error)]
pub enum BinaryProtocolError {
    #[error("frame truncated: wanted {wanted} bytes, had {available}")]
    FrameTruncated { wanted: usize, available: usize },
    #[error("unexpected message tag {tag:#04x} ({tag_char:?}) in state {state}")]
    UnexpectedMessage {
        tag: u8,
        tag_char: char,
        state: &'static str,
    },
    #[error("descriptor id mismatch: header said {header_id} but body carried {body_id}")]
    DescriptorIdMismatch { header_id: String, body_id: String },
    #[error("Data message carried {0} elements, expected exactly 1")]
    DataElementCount(u32),
    #[error("server re-sent fresh descriptors after an already-retried optimistic execute")]
    UnexpectedDescriptorRefresh,
    #[error("string field was not valid UTF-8")]
    InvalidUtf8,
}

/// SCRAM-SHA-256 / handshake authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("server requested unsupported auth status {0}")]
    UnexpectedStatus(i32),
    #[error("SCRAM: server signature did not match")]
    ServerSignatureMismatch,
    #[error("SCRAM: malformed server message: {0}")]
    MalformedServerMessage(String),
    #[error("authentication failed for {0}")]
    Rejected(ServerIdentifier),
}

/// Top-level error taxonomy returned by the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    ClientConnection(#[from] ClientConnectionError),

    #[error(transparent)]
    BinaryProtocol(#[from] BinaryProtocolError),

    #[error("server negotiated protocol version {got:?} outside supported range [{min:?}, {max:?}]")]
    UnsupportedProtocolVersion {
        got: (u16, u16),
        min: (u16, u16),
        max: (u16, u16),
    },

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("query argument error: {0}")]
    QueryArgument(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("expected cardinality {expected:?} but server returned {actual:?}")]
    ResultCardinalityMismatch {
        expected: crate::protocol::types::Cardinality,
        actual: crate::protocol::types::Cardinality,
    },

    #[error("no data returned for a query expecting at most one row")]
    NoData,

    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("transaction serialization failure: {0}")]
    TransactionSerialization(String),

    #[error("transaction deadlock detected: {0}")]
    TransactionDeadlock(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("server-side EdgeQL syntax error: {message} at {position}")]
    EdgeQLSyntax { message: String, position: String },

    #[error("server reported error {code:#010x}: {message}")]
    Server { code: u32, message: String },

    #[error("session state mismatch: {0}")]
    StateMismatch(String),

    #[error("protocol version does not support non-empty session state")]
    StateNotSupported,

    #[error("capability error: {0}")]
    Capability(String),

    #[error("capability disabled by server: {0}")]
    DisabledCapability(String),

    #[error("interface misuse: {0}")]
    Interface(&'static str),

    #[error("operation was cancelled")]
    Cancelled,
}

/// Configuration-level error (bad TLS material, contradictory options).
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid host/port: {0}")]
    InvalidAddress(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Retry/reconnect eligibility tags. Orthogonal to [`Error`] variants — a
/// single error may carry both tags at once. A plain bitset rather than a
/// dependency: there are only ever two tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorTags(u8);

impl ErrorTags {
    pub const SHOULD_RETRY: Self = Self(0b01);
    pub const SHOULD_RECONNECT: Self = Self(0b10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ErrorTags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ErrorTags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Classifies an [`Error`] into its retry/reconnect tags.
///
/// This is the "tagged aggregate" design note from the spec: tags are
/// computed from the error shape (and, for I/O errors, from the observed
/// connection phase) rather than stored as a separate field threaded
/// everywhere.
pub fn classify(err: &Error, was_idle: bool) -> ErrorTags {
    let mut tags = ErrorTags::empty();
    match err {
        Error::ClientConnection(inner) => {
            tags |= ErrorTags::SHOULD_RETRY;
            match inner {
                ClientConnectionError::FailedTemporarily { .. }
                | ClientConnectionError::Timeout { .. } => tags |= ErrorTags::SHOULD_RECONNECT,
                ClientConnectionError::Closed { .. } if was_idle => {
                    tags |= ErrorTags::SHOULD_RECONNECT
                }
                _ => {}
            }
        }
        Error::TransactionConflict(_)
        | Error::TransactionSerialization(_)
        | Error::TransactionDeadlock(_) => tags |= ErrorTags::SHOULD_RETRY,
        _ => {}
    }
    tags
}

impl ErrorTags {
    pub fn should_retry(self) -> bool {
        self.contains(Self::SHOULD_RETRY)
    }

    pub fn should_reconnect(self) -> bool {
        self.contains(Self::SHOULD_RECONNECT)
    }
}

/// Combines several causes into one error, per the "error wrapping chain"
/// design note. `Error`'s own sub-enums (`ClientConnectionError`, etc.) are
/// `#[error(transparent)]`, so `std::error::Error::source()` already skips
/// past them to whatever they themselves wrap; a parallel `is`/`as` lookup
/// walking that chain would either duplicate `classify`'s variant match or
/// silently miss the transparent layer it's supposed to find. `any_should_retry`
/// is the one cross-cause query call sites actually need, built directly on
/// `classify` instead. Most call sites only ever have one cause; this exists
/// for the pool's `close()`, which can accumulate one failure per connection
/// being drained.
#[derive(Debug)]
pub struct WrappedErrors {
    causes: Vec<Error>,
}

impl WrappedErrors {
    pub fn new() -> Self {
        Self { causes: Vec::new() }
    }

    /// Builds a `WrappedErrors` directly from a batch of causes.
    pub fn wrap_all(causes: Vec<Error>) -> Self {
        Self { causes }
    }

    pub fn push(&mut self, err: Error) {
        self.causes.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn into_result(self) -> Result<(), WrappedErrors> {
        if self.causes.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// True if any wrapped cause is tagged `ShouldRetry`.
    pub fn any_should_retry(&self, was_idle: bool) -> bool {
        self.causes
            .iter()
            .any(|e| classify(e, was_idle).should_retry())
    }
}

impl Default for WrappedErrors {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WrappedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred: ", self.causes.len())?;
        for (i, c) in self.causes.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WrappedErrors {}
