//! Wire-level message tags and status codes (§6 of the spec).

// Outbound message tags.
pub const MSG_CLIENT_HANDSHAKE: u8 = b'V';
pub const MSG_SASL_INITIAL_RESPONSE: u8 = b'p';
pub const MSG_SASL_RESPONSE: u8 = b'r';
pub const MSG_PARSE: u8 = b'P';
pub const MSG_DESCRIBE_STATEMENT: u8 = b'D';
pub const MSG_EXECUTE: u8 = b'E';
pub const MSG_OPTIMISTIC_EXECUTE: u8 = b'O';
pub const MSG_EXECUTE_SCRIPT: u8 = b'Q';
pub const MSG_SYNC: u8 = b'S';
pub const MSG_TERMINATE: u8 = b'X';

// Inbound message tags. Inbound and outbound tags share the single byte
// space of the protocol but belong to disjoint streams (what the client
// reads vs. what it writes), so a byte like 'D' legitimately means
// `DescribeStatement` when written and `Data` when read.
pub const MSG_SERVER_HANDSHAKE: u8 = b'v';
pub const MSG_SERVER_KEY_DATA: u8 = b'K';
pub const MSG_AUTHENTICATION: u8 = b'R';
pub const MSG_PARAMETER_STATUS: u8 = b'S';
pub const MSG_LOG_MESSAGE: u8 = b'L';
pub const MSG_ERROR_RESPONSE: u8 = b'E';
pub const MSG_COMMAND_DATA_DESCRIPTION: u8 = b'T';
pub const MSG_PARSE_COMPLETE: u8 = b'1';
pub const MSG_STATE_DATA_DESCRIPTION: u8 = b's';
pub const MSG_DATA: u8 = b'D';
pub const MSG_COMMAND_COMPLETE: u8 = b'C';
pub const MSG_READY_FOR_COMMAND: u8 = b'Z';

// Authentication status codes carried in the `Authentication` message.
pub const AUTH_OK: i32 = 0;
pub const AUTH_SASL: i32 = 0x0a;
pub const AUTH_SASL_CONTINUE: i32 = 0x0b;
pub const AUTH_SASL_FINAL: i32 = 0x0c;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

// Header block keys.
pub const HEADER_ALLOW_CAPABILITIES: u16 = 0xFF04;
pub const HEADER_EXPLICIT_OBJECT_IDS: u16 = 0xFF05;
pub const HEADER_CAPABILITIES: u16 = 0xFF01;

// Capability bits (subset relevant to the core; §4.5.7).
pub const CAP_MODIFICATIONS: u64 = 1 << 0;
pub const CAP_DDL: u64 = 1 << 1;
pub const CAP_TRANSACTION: u64 = 1 << 2;
pub const CAP_SESSION_CONFIG: u64 = 1 << 3;

pub const USER_CAPABILITIES: u64 = CAP_MODIFICATIONS;
pub const TRANSACTION_CAPABILITIES: u64 = CAP_MODIFICATIONS | CAP_DDL | CAP_TRANSACTION;

/// `DescribeStatement` aspect byte.
pub const ASPECT_DATA_DESCRIPTION: u8 = b'T';
