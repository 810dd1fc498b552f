//! Protocol connection state machine (§3) and the borrow-discipline marker
//! used by transactions (§4.11).

/// Lifecycle of a single protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Dialed,
    Authenticating,
    Ready,
    Executing,
    WaitingForReadyForCommand,
    /// Sticky. Any I/O error while not idle transitions here and poisons
    /// the connection.
    Closed,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

/// Records whether a connection is exclusively held by a transaction or
/// sub-transaction. Enforcement is a safety check, not a lock: direct
/// queries consult this before touching the wire (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowState {
    Unborrowed,
    Transaction,
    Subtransaction,
}

impl BorrowState {
    /// Valid transitions: `Unborrowed -> Transaction -> Subtransaction ->
    /// Transaction -> Unborrowed`. Anything else is a caller bug.
    pub fn borrow_for_transaction(self) -> Option<Self> {
        matches!(self, BorrowState::Unborrowed).then_some(BorrowState::Transaction)
    }

    pub fn enter_subtransaction(self) -> Option<Self> {
        matches!(self, BorrowState::Transaction).then_some(BorrowState::Subtransaction)
    }

    pub fn exit_subtransaction(self) -> Option<Self> {
        matches!(self, BorrowState::Subtransaction).then_some(BorrowState::Transaction)
    }

    pub fn release(self) -> Option<Self> {
        matches!(self, BorrowState::Transaction).then_some(BorrowState::Unborrowed)
    }

    pub fn is_unborrowed(self) -> bool {
        matches!(self, BorrowState::Unborrowed)
    }
}
