use chrono::{DateTime, SubsecRound, Utc};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteRow;

use crate::domain::{Account, Cents};

use super::{
    StorageError, StorageResult, column, format_timestamp, map_sqlx_error, parse_timestamp,
};

const ACCOUNT_COLUMNS: &str = "identity, balance_cents, display_name, created_at, deleted_at";

/// Result of a compare-and-set on an account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The stored balance no longer matches the expected value
    Conflict,
    /// No active account with that identity
    NotFound,
}

/// Account count and balance sum over active accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AccountTotals {
    pub account_count: i64,
    pub sum_of_balances: Cents,
}

/// Durable mapping from identity to balance and metadata.
///
/// Works on a borrowed connection so that a caller can run it inside the same
/// transaction as an [`OperationLog`](super::OperationLog) append.
pub struct AccountStore<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AccountStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get an account by identity, tombstoned or not.
    pub async fn get(&mut self, identity: &str) -> StorageResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE identity = ?"
        ))
        .bind(identity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("fetch account", e))?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Insert a new account. Fails with [`StorageError::Duplicate`] when the
    /// identity already has a row, including a tombstone.
    pub async fn create(
        &mut self,
        identity: &str,
        initial_balance: Cents,
    ) -> StorageResult<Account> {
        let mut account = Account::new(identity).with_balance(initial_balance);
        account.created_at = account.created_at.trunc_subsecs(6);

        sqlx::query(
            r#"
            INSERT INTO accounts (identity, balance_cents, display_name, created_at, deleted_at)
            VALUES (?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&account.identity)
        .bind(account.balance)
        .bind(&account.display_name)
        .bind(format_timestamp(&account.created_at))
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("create account", e))?;

        Ok(account)
    }

    /// Set the balance to `new_balance` only if it still equals `expected`.
    ///
    /// This is the sole write path for balances.
    pub async fn compare_and_set_balance(
        &mut self,
        identity: &str,
        expected: Cents,
        new_balance: Cents,
    ) -> StorageResult<CasOutcome> {
        if new_balance < 0 {
            return Err(StorageError::Constraint {
                context: "compare and set balance",
                message: format!("negative balance {} for {}", new_balance, identity),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = ?
            WHERE identity = ? AND balance_cents = ? AND deleted_at IS NULL
            "#,
        )
        .bind(new_balance)
        .bind(identity)
        .bind(expected)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("compare and set balance", e))?;

        if result.rows_affected() == 1 {
            return Ok(CasOutcome::Applied);
        }

        let active: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM accounts WHERE identity = ? AND deleted_at IS NULL",
        )
        .bind(identity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("compare and set balance", e))?;

        Ok(if active.is_some() {
            CasOutcome::Conflict
        } else {
            CasOutcome::NotFound
        })
    }

    /// Tombstone an active account. Returns the account as it was, or `None`
    /// if there is no active account with that identity.
    pub async fn delete(
        &mut self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "UPDATE accounts SET deleted_at = ? \
             WHERE identity = ? AND deleted_at IS NULL \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(format_timestamp(&at))
        .bind(identity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("delete account", e))?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Remove an active account's row entirely, freeing its identity.
    pub async fn purge(&mut self, identity: &str) -> StorageResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "DELETE FROM accounts WHERE identity = ? AND deleted_at IS NULL \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(identity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("purge account", e))?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Set or clear the display name of an active account.
    pub async fn set_display_name(
        &mut self,
        identity: &str,
        display_name: Option<&str>,
    ) -> StorageResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "UPDATE accounts SET display_name = ? \
             WHERE identity = ? AND deleted_at IS NULL \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(display_name)
        .bind(identity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("set display name", e))?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Active accounts carrying exactly this display name, oldest first.
    /// Display names are not unique.
    pub async fn find_by_display_name(
        &mut self,
        display_name: &str,
    ) -> StorageResult<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE display_name = ? AND deleted_at IS NULL \
             ORDER BY created_at, identity"
        ))
        .bind(display_name)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("find accounts by display name", e))?;

        rows.iter().map(row_to_account).collect()
    }

    /// List accounts, newest first.
    pub async fn list(&mut self, include_deleted: bool) -> StorageResult<Vec<Account>> {
        let filter = if include_deleted {
            ""
        } else {
            "WHERE deleted_at IS NULL"
        };
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts {filter} ORDER BY created_at DESC, identity"
        ))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("list accounts", e))?;

        rows.iter().map(row_to_account).collect()
    }

    /// Count and balance sum over active accounts.
    pub async fn totals(&mut self) -> StorageResult<AccountTotals> {
        let (account_count, sum_of_balances): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(balance_cents), 0)
            FROM accounts
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("account totals", e))?;

        Ok(AccountTotals {
            account_count,
            sum_of_balances,
        })
    }
}

fn row_to_account(row: &SqliteRow) -> StorageResult<Account> {
    let created_at: String = column(row, "created_at")?;
    let deleted_at: Option<String> = column(row, "deleted_at")?;

    Ok(Account {
        identity: column(row, "identity")?,
        balance: column(row, "balance_cents")?,
        display_name: column(row, "display_name")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        deleted_at: deleted_at
            .map(|s| parse_timestamp(&s, "deleted_at"))
            .transpose()?,
    })
}
