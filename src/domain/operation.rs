use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type OperationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
    /// Non-transactional bookkeeping entries, such as the account opening marker
    Adjustment,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Deposit,
        OperationKind::Withdrawal,
        OperationKind::TransferOut,
        OperationKind::TransferIn,
        OperationKind::Adjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdrawal",
            OperationKind::TransferOut => "transfer_out",
            OperationKind::TransferIn => "transfer_in",
            OperationKind::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(OperationKind::Deposit),
            "withdrawal" => Some(OperationKind::Withdrawal),
            "transfer_out" => Some(OperationKind::TransferOut),
            "transfer_in" => Some(OperationKind::TransferIn),
            "adjustment" => Some(OperationKind::Adjustment),
            _ => None,
        }
    }

    /// Whether a record of this kind must carry a positive, negative or any amount.
    pub fn sign(&self) -> AmountSign {
        match self {
            OperationKind::Deposit | OperationKind::TransferIn => AmountSign::Positive,
            OperationKind::Withdrawal | OperationKind::TransferOut => AmountSign::Negative,
            OperationKind::Adjustment => AmountSign::Any,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSign {
    Positive,
    Negative,
    Any,
}

/// An immutable record of one balance-affecting event on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Global sequence number, assigned by the log in commit order
    pub sequence: i64,
    pub account: AccountId,
    pub kind: OperationKind,
    /// Signed change in cents: credits positive, debits negative
    pub amount: Cents,
    pub details: String,
    /// The other account of a transfer
    pub counterparty: Option<AccountId>,
    /// The mirror record of a transfer
    pub linked_operation: Option<OperationId>,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// Create a new record. Sequence number and final timestamp are assigned on append.
    pub fn new(
        account: impl Into<AccountId>,
        kind: OperationKind,
        amount: Cents,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by the log
            account: account.into(),
            kind,
            amount,
            details: details.into(),
            counterparty: None,
            linked_operation: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<AccountId>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn with_linked_operation(mut self, id: OperationId) -> Self {
        self.linked_operation = Some(id);
        self
    }

    /// Build the debit and credit records of a transfer, linked to each other.
    pub fn transfer_pair(
        from: &str,
        to: &str,
        amount: Cents,
        details: Option<&str>,
    ) -> (Operation, Operation) {
        let out_details = details
            .map(str::to_string)
            .unwrap_or_else(|| format!("Transfer to {}", to));
        let in_details = details
            .map(str::to_string)
            .unwrap_or_else(|| format!("Transfer from {}", from));

        let mut debit = Operation::new(from, OperationKind::TransferOut, -amount, out_details)
            .with_counterparty(to);
        let credit = Operation::new(to, OperationKind::TransferIn, amount, in_details)
            .with_counterparty(from)
            .with_linked_operation(debit.id);
        debit.linked_operation = Some(credit.id);
        (debit, credit)
    }
}
