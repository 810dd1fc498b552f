//! Small value types shared across the protocol layer.

use std::fmt;

/// Result encoding requested for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFormat {
    Binary,
    Json,
    Null,
}

impl IoFormat {
    pub fn as_wire_byte(self) -> u8 {
        match self {
            IoFormat::Binary => b'b',
            IoFormat::Json => b'j',
            IoFormat::Null => b'n',
        }
    }
}

/// Caller-declared expected cardinality (§4.5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    One,
    AtMostOne,
    Many,
}

impl Cardinality {
    pub fn as_wire_byte(self) -> u8 {
        match self {
            Cardinality::One => b'o',
            Cardinality::AtMostOne => b'm',
            Cardinality::Many => b'M',
        }
    }

    pub fn from_wire_byte(b: u8) -> Option<Self> {
        match b {
            b'o' => Some(Cardinality::One),
            b'm' => Some(Cardinality::AtMostOne),
            b'M' => Some(Cardinality::Many),
            _ => None,
        }
    }

    /// True if `actual` satisfies a caller that declared `self`.
    pub fn admits(self, actual: Cardinality) -> bool {
        match self {
            Cardinality::Many => true,
            Cardinality::One | Cardinality::AtMostOne => actual != Cardinality::Many,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "One"),
            Cardinality::AtMostOne => write!(f, "AtMostOne"),
            Cardinality::Many => write!(f, "Many"),
        }
    }
}

/// Query source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    EdgeQL,
    Sql,
}

/// Transaction state as reported on `ReadyForCommand` (§4.5.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction,
    InFailedTransaction,
}

impl TransactionState {
    pub fn from_wire_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionState::Idle),
            b'T' => Some(TransactionState::InTransaction),
            b'E' => Some(TransactionState::InFailedTransaction),
            _ => None,
        }
    }
}

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn flavor(self) -> ProtocolFlavor {
        if self.major == 0 {
            ProtocolFlavor::V0
        } else if self.major == 1 {
            ProtocolFlavor::V1
        } else {
            ProtocolFlavor::V2Plus
        }
    }
}

/// Per-version-range strategy selected once at handshake time (§9 design
/// note: "factor the per-version differences into a strategy object").
/// A plain enum with match-driven helpers rather than a trait object: the
/// three variants are closed and known at compile time, so a trait object
/// would only add indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFlavor {
    /// Protocol 0.x: `Prepare`/`OptimisticExecute`, descriptors arrive via a
    /// follow-up `DescribeStatement` unless the optimistic path is taken.
    V0,
    /// Protocol 1.x: `Parse`/`Execute` carry descriptors inline; optimistic
    /// execute retries once on a fresh `ParseComplete`.
    V1,
    /// Protocol 2.0+: like 1.x plus a session state payload on every
    /// `Execute`.
    V2Plus,
}

impl ProtocolFlavor {
    /// Whether prepare/parse also returns descriptors inline (true for
    /// 1.x+) or requires a follow-up `DescribeStatement` (0.x only).
    pub fn describe_is_inline(self) -> bool {
        !matches!(self, ProtocolFlavor::V0)
    }

    /// Whether the optimistic path retries once after a mid-stream
    /// descriptor refresh (true for 1.x+; 0.x's server executes the
    /// refreshed descriptors directly without a client-side retry).
    pub fn optimistic_retries(self) -> bool {
        !matches!(self, ProtocolFlavor::V0)
    }

    /// Whether `Execute` carries a session state payload.
    pub fn carries_state(self) -> bool {
        matches!(self, ProtocolFlavor::V2Plus)
    }
}
