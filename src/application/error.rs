use thiserror::Error;

use crate::domain::{Cents, OperationId, format_cents};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Account has been deleted: {0}")]
    AccountGone(String),

    #[error("Invalid account identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Invalid display name: {0:?} (must be 3 to 20 characters)")]
    InvalidDisplayName(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error(
        "Insufficient funds in account {identity}: balance {}, required {}",
        money(.balance),
        money(.required)
    )]
    InsufficientFunds {
        identity: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(String),

    #[error("Gave up on {operation} after {attempts} conflicting attempts")]
    Contention {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

fn money(cents: &Cents) -> String {
    format_cents(*cents)
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            LedgerError::StorageUnavailable(err)
        } else {
            LedgerError::Storage(err)
        }
    }
}

impl LedgerError {
    /// Stable machine-readable code for callers that map failures to messages.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) | LedgerError::OperationNotFound(_) => "not_found",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::AccountGone(_) => "account_gone",
            LedgerError::InvalidIdentity(_) => "invalid_identity",
            LedgerError::InvalidDisplayName(_) => "invalid_display_name",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::SameAccount(_) => "same_account",
            LedgerError::Contention { .. } => "contention",
            LedgerError::StorageUnavailable(_) => "storage_unavailable",
            LedgerError::Storage(_) => "storage_error",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}
