use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

/// Externally supplied account key (platform user id or handle).
pub type AccountId = String;

/// Longest identity accepted by the ledger.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Inclusive bounds on display name length, in characters.
pub const DISPLAY_NAME_MIN_LEN: usize = 3;
pub const DISPLAY_NAME_MAX_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub identity: AccountId,
    pub balance: Cents,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Tombstone set when the account is deleted with history retained.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(identity: impl Into<AccountId>) -> Self {
        Self {
            identity: identity.into(),
            balance: 0,
            display_name: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn with_balance(mut self, balance: Cents) -> Self {
        self.balance = balance;
        self
    }

    pub fn status(&self) -> AccountStatus {
        if self.deleted_at.is_some() {
            AccountStatus::Deleted
        } else {
            AccountStatus::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == AccountStatus::Active
    }

    /// Name to show to people: the display name, or the identity when unset.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.identity)
    }
}

/// Normalize an identity: trimmed, non-empty, bounded length, no control characters.
pub fn normalize_identity(raw: &str) -> Option<AccountId> {
    let identity = raw.trim();
    if identity.is_empty()
        || identity.chars().count() > MAX_IDENTITY_LEN
        || identity.chars().any(char::is_control)
    {
        return None;
    }
    Some(identity.to_string())
}

/// Validate a display name. Returns the trimmed name when it has 3 to 20 characters.
pub fn validate_display_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(DISPLAY_NAME_MIN_LEN..=DISPLAY_NAME_MAX_LEN).contains(&len)
        || name.chars().any(char::is_control)
    {
        return None;
    }
    Some(name.to_string())
}
