use chrono::Utc;
use tracing::{info, instrument};

use crate::config::LedgerConfig;
use crate::domain::{
    Account, Activity, ActivityAction, Cents, Operation, OperationKind, format_cents,
    normalize_identity, validate_display_name,
};
use crate::storage::{
    AccountStore, ActivityJournal, CasOutcome, OperationLog, Repository, StorageError,
};

use super::retry::{Attempt, RetryPolicy};
use super::{LedgerError, LedgerQueries};

/// What happens to an account's operation records when it is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Tombstone the account and keep its history. The identity stays reserved.
    #[default]
    Retain,
    /// Erase the account and all of its records. The identity may be registered again.
    Purge,
}

/// Result of a deposit or withdrawal
#[derive(Debug, Clone)]
pub struct Receipt {
    pub operation: Operation,
    pub balance: Cents,
}

/// Result of a transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub debit: Operation,
    pub credit: Operation,
    pub from_balance: Cents,
    pub to_balance: Cents,
}

/// Result of an account deletion
#[derive(Debug, Clone)]
pub struct DeletedAccount {
    pub account: Account,
    pub policy: DeletePolicy,
    pub purged_operations: u64,
}

/// Application service owning every write to balances and the operation log.
/// This is the primary interface for any client (CLI, bot, API, etc.).
#[derive(Debug, Clone)]
pub struct LedgerService {
    repo: Repository,
    config: LedgerConfig,
    retry: RetryPolicy,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        let retry = RetryPolicy::new(&config);
        Self {
            repo,
            config,
            retry,
        }
    }

    /// Open the database described by `config`, creating and migrating it if needed.
    pub async fn init(config: LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database without migrating.
    pub async fn connect(config: LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::connect(&config).await?;
        Ok(Self::new(repo, config))
    }

    /// Read-only view over the same pool.
    pub fn queries(&self) -> LedgerQueries {
        LedgerQueries::new(self.repo.clone(), &self.config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn close(&self) {
        self.repo.close().await;
    }

    // ========================
    // Account lifecycle
    // ========================

    /// Register an account. Registering an active identity again returns it unchanged.
    #[instrument(skip(self))]
    pub async fn register(&self, identity: &str) -> Result<Account, LedgerError> {
        self.register_named(identity, None).await
    }

    /// Register an account with an optional display name.
    ///
    /// The name is validated before anything is written and is only applied to
    /// a newly created account. An already active identity is returned unchanged.
    #[instrument(skip(self))]
    pub async fn register_named(
        &self,
        identity: &str,
        display_name: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let identity = identity_of(identity)?;
        let display_name = display_name.map(display_name_of).transpose()?;
        self.retry
            .run("register", || {
                self.try_register(&identity, display_name.as_deref(), false)
            })
            .await
    }

    /// Strict registration: fails with `AlreadyExists` if the identity has an
    /// active account, and `AccountGone` if it was deleted with history retained.
    #[instrument(skip(self))]
    pub async fn create_account(&self, identity: &str) -> Result<Account, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .run("create account", || self.try_register(&identity, None, true))
            .await
    }

    async fn try_register(
        &self,
        identity: &str,
        display_name: Option<&str>,
        strict: bool,
    ) -> Result<Attempt<Account>, LedgerError> {
        let mut tx = self.repo.begin().await?;

        let created = AccountStore::new(&mut tx).create(identity, 0).await;
        match created {
            Ok(mut account) => {
                let mut details = "Account registered".to_string();
                if let Some(name) = display_name {
                    account = AccountStore::new(&mut tx)
                        .set_display_name(identity, Some(name))
                        .await?
                        .ok_or_else(|| LedgerError::AccountNotFound(identity.to_string()))?;
                    details = format!("Account registered as {}", name);
                }

                let mut registered = Activity::new(identity, ActivityAction::Registered, details);
                ActivityJournal::new(&mut tx).record(&mut registered).await?;

                if self.config.record_account_opening {
                    let mut opening =
                        Operation::new(identity, OperationKind::Adjustment, 0, "Account opened");
                    OperationLog::new(&mut tx).append(&mut opening).await?;
                }
                commit(tx).await?;
                info!(identity, "account registered");
                Ok(Attempt::Done(account))
            }
            Err(StorageError::Duplicate { .. }) => {
                drop(tx);
                let existing = self.load_account(identity).await?;
                match existing {
                    Some(account) if account.is_active() && strict => {
                        Err(LedgerError::AlreadyExists(account.identity))
                    }
                    Some(account) if account.is_active() => Ok(Attempt::Done(account)),
                    Some(_) => Err(LedgerError::AccountGone(identity.to_string())),
                    // Purged between the insert and the read; try again
                    None => Ok(Attempt::Conflict),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete an account according to `policy`.
    #[instrument(skip(self))]
    pub async fn delete_account(
        &self,
        identity: &str,
        policy: DeletePolicy,
    ) -> Result<DeletedAccount, LedgerError> {
        let identity = identity_of(identity)?;
        self.retry
            .run("delete account", || self.try_delete(&identity, policy))
            .await
    }

    async fn try_delete(
        &self,
        identity: &str,
        policy: DeletePolicy,
    ) -> Result<Attempt<DeletedAccount>, LedgerError> {
        let mut tx = self.repo.begin().await?;

        let account = match policy {
            DeletePolicy::Retain => AccountStore::new(&mut tx).delete(identity, Utc::now()).await?,
            DeletePolicy::Purge => AccountStore::new(&mut tx).purge(identity).await?,
        };
        let Some(account) = account else {
            return Err(LedgerError::AccountNotFound(identity.to_string()));
        };

        let (purged_operations, mut entry) = match policy {
            DeletePolicy::Retain => {
                let details = "Account deleted, history retained";
                (0, Activity::new(identity, ActivityAction::Deleted, details))
            }
            DeletePolicy::Purge => {
                let purged = OperationLog::new(&mut tx).purge_account(identity).await?;
                // Earlier entries go; the purge entry recorded below stays
                ActivityJournal::new(&mut tx).purge_account(identity).await?;
                let details = format!("Account purged with {} records", purged);
                (purged, Activity::new(identity, ActivityAction::Purged, details))
            }
        };
        ActivityJournal::new(&mut tx).record(&mut entry).await?;

        commit(tx).await?;
        info!(identity, ?policy, purged_operations, "account deleted");
        Ok(Attempt::Done(DeletedAccount {
            account,
            policy,
            purged_operations,
        }))
    }

    /// Set or clear an account's display name.
    #[instrument(skip(self))]
    pub async fn set_display_name(
        &self,
        identity: &str,
        display_name: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let identity = identity_of(identity)?;
        let display_name = display_name.map(display_name_of).transpose()?;

        self.retry
            .transient("set display name", || async {
                let mut tx = self.repo.begin().await?;
                let account = AccountStore::new(&mut tx)
                    .set_display_name(&identity, display_name.as_deref())
                    .await?
                    .ok_or_else(|| LedgerError::AccountNotFound(identity.clone()))?;

                let mut renamed = Activity::renamed(identity.as_str(), display_name.as_deref());
                ActivityJournal::new(&mut tx).record(&mut renamed).await?;
                commit(tx).await?;
                Ok::<_, LedgerError>(account)
            })
            .await
    }

    // ========================
    // Balance operations
    // ========================

    /// Add `amount` to an account.
    #[instrument(skip(self))]
    pub async fn deposit(&self, identity: &str, amount: Cents) -> Result<Receipt, LedgerError> {
        let identity = identity_of(identity)?;
        ensure_positive(amount)?;
        self.retry
            .run("deposit", || {
                self.try_adjust(&identity, OperationKind::Deposit, amount)
            })
            .await
    }

    /// Remove `amount` from an account, failing if the balance is too low.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, identity: &str, amount: Cents) -> Result<Receipt, LedgerError> {
        let identity = identity_of(identity)?;
        ensure_positive(amount)?;
        self.retry
            .run("withdraw", || {
                self.try_adjust(&identity, OperationKind::Withdrawal, -amount)
            })
            .await
    }

    /// One read-check-CAS-append cycle for a single account.
    ///
    /// The read happens under the write lock, so the balance it sees is current.
    /// The sufficiency check runs against the same balance the CAS expects.
    async fn try_adjust(
        &self,
        identity: &str,
        kind: OperationKind,
        delta: Cents,
    ) -> Result<Attempt<Receipt>, LedgerError> {
        let mut tx = self.repo.begin_write().await?;
        let account = active_in(&mut tx, identity).await?;
        let balance = checked_balance(&account, delta)?;

        let outcome = AccountStore::new(&mut tx)
            .compare_and_set_balance(identity, account.balance, balance)
            .await?;
        match outcome {
            CasOutcome::Applied => {}
            CasOutcome::Conflict => return Ok(Attempt::Conflict),
            CasOutcome::NotFound => {
                return Err(LedgerError::AccountNotFound(identity.to_string()));
            }
        }

        let details = match kind {
            OperationKind::Deposit => format!("Deposit of {}", format_cents(delta)),
            _ => format!("Withdrawal of {}", format_cents(-delta)),
        };
        let mut operation = Operation::new(identity, kind, delta, details);
        OperationLog::new(&mut tx).append(&mut operation).await?;
        commit(tx).await?;

        info!(identity, kind = %kind, amount = delta, balance, "balance updated");
        Ok(Attempt::Done(Receipt { operation, balance }))
    }

    /// Move `amount` from one account to another as one atomic unit.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Cents,
    ) -> Result<TransferReceipt, LedgerError> {
        let from = identity_of(from)?;
        let to = identity_of(to)?;
        ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::SameAccount(from));
        }

        self.retry
            .run("transfer", || self.try_transfer(&from, &to, amount))
            .await
    }

    async fn try_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Cents,
    ) -> Result<Attempt<TransferReceipt>, LedgerError> {
        let mut tx = self.repo.begin_write().await?;
        let source = active_in(&mut tx, from).await?;
        let destination = active_in(&mut tx, to).await?;

        let from_balance = checked_balance(&source, -amount)?;
        let to_balance = checked_balance(&destination, amount)?;

        for (identity, expected, new_balance) in [
            (from, source.balance, from_balance),
            (to, destination.balance, to_balance),
        ] {
            let outcome = AccountStore::new(&mut tx)
                .compare_and_set_balance(identity, expected, new_balance)
                .await?;
            match outcome {
                CasOutcome::Applied => {}
                // Dropping the transaction rolls back the first side
                CasOutcome::Conflict => return Ok(Attempt::Conflict),
                CasOutcome::NotFound => {
                    return Err(LedgerError::AccountNotFound(identity.to_string()));
                }
            }
        }

        let (mut debit, mut credit) = Operation::transfer_pair(from, to, amount, None);
        let mut log = OperationLog::new(&mut tx);
        log.append(&mut debit).await?;
        log.append(&mut credit).await?;
        commit(tx).await?;

        info!(from, to, amount, from_balance, to_balance, "transfer committed");
        Ok(Attempt::Done(TransferReceipt {
            debit,
            credit,
            from_balance,
            to_balance,
        }))
    }

    // ========================
    // Helpers
    // ========================

    async fn load_account(&self, identity: &str) -> Result<Option<Account>, LedgerError> {
        // Scoped so the connection is back in the pool before a transaction starts
        let mut conn = self.repo.acquire().await?;
        Ok(AccountStore::new(&mut conn).get(identity).await?)
    }

}

async fn active_in(
    conn: &mut sqlx::SqliteConnection,
    identity: &str,
) -> Result<Account, LedgerError> {
    AccountStore::new(conn)
        .get(identity)
        .await?
        .filter(Account::is_active)
        .ok_or_else(|| LedgerError::AccountNotFound(identity.to_string()))
}

async fn commit(tx: sqlx::Transaction<'static, sqlx::Sqlite>) -> Result<(), LedgerError> {
    tx.commit()
        .await
        .map_err(|e| crate::storage::map_sqlx_error("commit", e))?;
    Ok(())
}

pub(super) fn identity_of(raw: &str) -> Result<String, LedgerError> {
    normalize_identity(raw).ok_or_else(|| LedgerError::InvalidIdentity(raw.to_string()))
}

pub(super) fn display_name_of(raw: &str) -> Result<String, LedgerError> {
    validate_display_name(raw).ok_or_else(|| LedgerError::InvalidDisplayName(raw.to_string()))
}

fn ensure_positive(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            format_cents(amount)
        )));
    }
    Ok(())
}

/// Balance after applying `delta`, rejecting overdraft and overflow.
fn checked_balance(account: &Account, delta: Cents) -> Result<Cents, LedgerError> {
    let new_balance = account
        .balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::InvalidAmount("balance would overflow".to_string()))?;

    if new_balance < 0 {
        return Err(LedgerError::InsufficientFunds {
            identity: account.identity.clone(),
            balance: account.balance,
            required: -delta,
        });
    }
    Ok(new_balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_balance_rejects_overdraft() {
        let account = Account::new("A").with_balance(10000);
        assert_eq!(checked_balance(&account, -4000).unwrap(), 6000);
        assert!(matches!(
            checked_balance(&account, -15000),
            Err(LedgerError::InsufficientFunds {
                balance: 10000,
                required: 15000,
                ..
            })
        ));
    }

    #[test]
    fn test_checked_balance_rejects_overflow() {
        let account = Account::new("A").with_balance(Cents::MAX);
        assert!(matches!(
            checked_balance(&account, 1),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(1).is_ok());
        assert!(matches!(ensure_positive(0), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(ensure_positive(-5), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_display_name_is_validated() {
        assert_eq!(display_name_of(" Alice ").unwrap(), "Alice");
        assert!(matches!(
            display_name_of("ab"),
            Err(LedgerError::InvalidDisplayName(_))
        ));
    }

    #[test]
    fn test_identity_is_trimmed() {
        assert_eq!(identity_of(" 42 ").unwrap(), "42");
        assert!(matches!(identity_of(""), Err(LedgerError::InvalidIdentity(_))));
    }
}
