use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Lifecycle event recorded in an account's activity journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Registered,
    Renamed,
    Deleted,
    Purged,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Registered => "registered",
            ActivityAction::Renamed => "renamed",
            ActivityAction::Deleted => "deleted",
            ActivityAction::Purged => "purged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(ActivityAction::Registered),
            "renamed" => Some(ActivityAction::Renamed),
            "deleted" => Some(ActivityAction::Deleted),
            "purged" => Some(ActivityAction::Purged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the activity journal. Balance changes live in the operation
/// log; the journal covers registration, renames and deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Assigned by the journal on append
    pub id: i64,
    pub account: AccountId,
    pub action: ActivityAction,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        account: impl Into<AccountId>,
        action: ActivityAction,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            account: account.into(),
            action,
            details: details.into(),
            created_at: Utc::now(),
        }
    }

    /// Entry for a display name being set or cleared.
    pub fn renamed(account: impl Into<AccountId>, display_name: Option<&str>) -> Self {
        let details = match display_name {
            Some(name) => format!("Display name set to {}", name),
            None => "Display name cleared".to_string(),
        };
        Self::new(account, ActivityAction::Renamed, details)
    }
}
