//! Per-actor transaction state.
//!
//! Each actor instance owns one session. The backend client tracks the
//! driver-level session; this tracks the logical state so illegal sequences
//! are caught before anything is sent.

use crate::error::OperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No transaction has been started yet
    #[default]
    None,
    Active,
    /// Last transaction committed; a new one may start
    Committed,
    /// Last transaction aborted; a new one may start
    Aborted,
}

#[derive(Debug, Default)]
pub struct SessionState {
    state: TransactionState,
    started: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Transactions started over the session's lifetime.
    pub fn transactions_started(&self) -> u64 {
        self.started
    }

    /// Check that `operation` may run inside a transaction.
    pub fn require_active(&self, operation: &str) -> Result<(), OperationError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(OperationError::usage(
                operation,
                "no transaction is active on this session",
            ))
        }
    }

    /// Check that a new transaction may start.
    pub fn require_idle(&self, operation: &str) -> Result<(), OperationError> {
        if self.is_active() {
            Err(OperationError::usage(
                operation,
                "a transaction is already active on this session",
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn mark_started(&mut self) {
        self.state = TransactionState::Active;
        self.started += 1;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }
}
