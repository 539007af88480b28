use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, Activity, Cents, IntegrityReport, Operation, OperationId, OperationKind,
    build_integrity_report,
};
use crate::storage::{
    AccountStore, AccountTotals, ActivityJournal, OperationCursor, OperationLog,
    OperationSelector, Order, Repository,
};

use super::LedgerError;
use super::retry::RetryPolicy;
use super::service::{display_name_of, identity_of};

/// Aggregate figures over all active accounts
pub type SystemTotals = AccountTotals;

/// Detailed account information
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub account: Account,
    pub operation_count: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Everything the ledger holds, read in one transaction
#[derive(Debug, Clone, Serialize)]
pub struct LedgerContents {
    pub accounts: Vec<Account>,
    pub operations: Vec<Operation>,
    pub activity: Vec<Activity>,
}

/// Read-only projections over accounts and the operation log.
///
/// Each call reads inside a single transaction, so multi-step projections see
/// one consistent snapshot. Nothing here writes.
#[derive(Debug, Clone)]
pub struct LedgerQueries {
    repo: Repository,
    retry: RetryPolicy,
}

impl LedgerQueries {
    pub fn new(repo: Repository, config: &LedgerConfig) -> Self {
        Self {
            repo,
            retry: RetryPolicy::new(config),
        }
    }

    /// Current balance of an active account.
    pub async fn balance(&self, identity: &str) -> Result<Cents, LedgerError> {
        Ok(self.account(identity).await?.balance)
    }

    /// An active account.
    pub async fn account(&self, identity: &str) -> Result<Account, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .transient("account", || async {
                let mut conn = self.repo.acquire().await?;
                let account = AccountStore::new(&mut conn).get(&identity).await?;
                account
                    .filter(Account::is_active)
                    .ok_or_else(|| LedgerError::AccountNotFound(identity.clone()))
            })
            .await
    }

    /// An account's records, most recent first, optionally limited.
    ///
    /// History of a deleted account stays readable unless it was purged.
    pub async fn history(
        &self,
        identity: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Operation>, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .transient("history", || async {
                let mut tx = self.repo.begin().await?;
                let known = AccountStore::new(&mut tx).get(&identity).await?.is_some();
                if !known {
                    return Err(LedgerError::AccountNotFound(identity.clone()));
                }
                let operations = OperationLog::new(&mut tx)
                    .recent_by_account(&identity, limit)
                    .await?;
                Ok::<_, LedgerError>(operations)
            })
            .await
    }

    /// Lazy listing of an account's records, most recent first.
    pub async fn history_cursor(&self, identity: &str) -> Result<OperationCursor, LedgerError> {
        let identity = identity_of(identity)?;
        let known = self
            .retry
            .transient("history cursor", || async {
                let mut conn = self.repo.acquire().await?;
                let account = AccountStore::new(&mut conn).get(&identity).await?;
                Ok::<_, LedgerError>(account.is_some())
            })
            .await?;
        if !known {
            return Err(LedgerError::AccountNotFound(identity));
        }

        Ok(OperationCursor::by_account(
            self.repo.pool().clone(),
            identity,
            Order::NewestFirst,
        ))
    }

    /// Lazy system-wide listing of records of one kind, most recent first.
    pub fn operations_by_kind(&self, kind: OperationKind) -> OperationCursor {
        OperationCursor::by_kind(self.repo.pool().clone(), kind, Order::NewestFirst)
    }

    /// Lazy listing of every record in commit order.
    pub fn all_operations(&self) -> OperationCursor {
        OperationCursor::new(
            self.repo.pool().clone(),
            OperationSelector::All,
            Order::OldestFirst,
        )
    }

    /// A single record by ID.
    pub async fn operation(&self, id: OperationId) -> Result<Operation, LedgerError> {
        self.retry
            .transient("operation", || async {
                let mut conn = self.repo.acquire().await?;
                let operation = OperationLog::new(&mut conn).get(id).await?;
                operation.ok_or(LedgerError::OperationNotFound(id))
            })
            .await
    }

    /// Number of active accounts and the sum of their balances.
    pub async fn system_totals(&self) -> Result<SystemTotals, LedgerError> {
        self.retry
            .transient("system totals", || async {
                let mut conn = self.repo.acquire().await?;
                let totals = AccountStore::new(&mut conn).totals().await?;
                Ok::<_, LedgerError>(totals)
            })
            .await
    }

    /// Accounts newest first, with tombstones only when `include_deleted` is set.
    pub async fn list_accounts(&self, include_deleted: bool) -> Result<Vec<Account>, LedgerError> {
        self.retry
            .transient("list accounts", || async {
                let mut conn = self.repo.acquire().await?;
                let accounts = AccountStore::new(&mut conn).list(include_deleted).await?;
                Ok::<_, LedgerError>(accounts)
            })
            .await
    }

    /// Account with its record count and latest activity.
    pub async fn account_info(&self, identity: &str) -> Result<AccountInfo, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .transient("account info", || async {
                let mut tx = self.repo.begin().await?;
                let account = AccountStore::new(&mut tx)
                    .get(&identity)
                    .await?
                    .filter(Account::is_active)
                    .ok_or_else(|| LedgerError::AccountNotFound(identity.clone()))?;

                let mut log = OperationLog::new(&mut tx);
                let operation_count = log.count_by_account(&identity).await?;
                let last_activity = log.last_activity(&identity).await?;

                Ok::<_, LedgerError>(AccountInfo {
                    account,
                    operation_count,
                    last_activity,
                })
            })
            .await
    }

    /// An account's lifecycle activity, most recent first, optionally limited.
    ///
    /// A purged identity keeps its purge entry, so it is still found here.
    pub async fn activity(
        &self,
        identity: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Activity>, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .transient("activity", || async {
                let mut tx = self.repo.begin().await?;
                let entries = ActivityJournal::new(&mut tx)
                    .by_account(&identity, limit)
                    .await?;
                let known = !entries.is_empty()
                    || AccountStore::new(&mut tx).get(&identity).await?.is_some();
                if !known {
                    return Err(LedgerError::AccountNotFound(identity.clone()));
                }
                Ok::<_, LedgerError>(entries)
            })
            .await
    }

    /// Active accounts with this display name, oldest first.
    pub async fn find_by_display_name(&self, name: &str) -> Result<Vec<Account>, LedgerError> {
        let name = display_name_of(name)?;
        self.retry
            .transient("find by display name", || async {
                let mut conn = self.repo.acquire().await?;
                let accounts = AccountStore::new(&mut conn)
                    .find_by_display_name(&name)
                    .await?;
                Ok::<_, LedgerError>(accounts)
            })
            .await
    }

    /// Accounts, every record and the activity journal from one snapshot.
    pub async fn contents(&self) -> Result<LedgerContents, LedgerError> {
        self.retry
            .transient("ledger contents", || async {
                let mut tx = self.repo.begin().await?;
                let accounts = AccountStore::new(&mut tx).list(true).await?;
                let operations = OperationLog::new(&mut tx).all().await?;
                let activity = ActivityJournal::new(&mut tx).all().await?;
                Ok::<_, LedgerError>(LedgerContents {
                    accounts,
                    operations,
                    activity,
                })
            })
            .await
    }

    /// Check that stored balances agree with the operation log.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        self.retry
            .transient("check integrity", || async {
                let mut tx = self.repo.begin().await?;
                let accounts = AccountStore::new(&mut tx).list(true).await?;
                let operations = OperationLog::new(&mut tx).all().await?;
                Ok::<_, LedgerError>(build_integrity_report(&accounts, &operations))
            })
            .await
    }
}
