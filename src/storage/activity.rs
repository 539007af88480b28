use chrono::SubsecRound;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteRow;

use crate::domain::{Activity, ActivityAction};

use super::{StorageError, StorageResult, column, format_timestamp, map_sqlx_error, parse_timestamp};

/// Append-only journal of account lifecycle events.
///
/// Borrows a connection like the other stores, so an entry commits together
/// with the account change it describes.
pub struct ActivityJournal<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ActivityJournal<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Append an entry and assign its ID.
    pub async fn record(&mut self, activity: &mut Activity) -> StorageResult<i64> {
        activity.created_at = activity.created_at.trunc_subsecs(6);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO activity (account_identity, action, details, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&activity.account)
        .bind(activity.action.as_str())
        .bind(&activity.details)
        .bind(format_timestamp(&activity.created_at))
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("record activity", e))?;

        activity.id = id;
        Ok(id)
    }

    /// Entries of an account, most recent first.
    pub async fn by_account(
        &mut self,
        identity: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Activity>> {
        let limit = limit.map_or(i64::MAX, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r#"
            SELECT id, account_identity, action, details, created_at
            FROM activity
            WHERE account_identity = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(identity)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("list activity", e))?;

        rows.iter().map(row_to_activity).collect()
    }

    /// Every entry in the order it was recorded.
    pub async fn all(&mut self) -> StorageResult<Vec<Activity>> {
        let rows = sqlx::query(
            "SELECT id, account_identity, action, details, created_at FROM activity ORDER BY id",
        )
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("list activity", e))?;

        rows.iter().map(row_to_activity).collect()
    }

    /// Erase every entry of an account. Only used when an account is purged.
    pub async fn purge_account(&mut self, identity: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM activity WHERE account_identity = ?")
            .bind(identity)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("purge activity", e))?;
        Ok(result.rows_affected())
    }
}

fn row_to_activity(row: &SqliteRow) -> StorageResult<Activity> {
    let action: String = column(row, "action")?;
    let created_at: String = column(row, "created_at")?;

    Ok(Activity {
        id: column(row, "id")?,
        account: column(row, "account_identity")?,
        action: ActivityAction::from_str(&action)
            .ok_or_else(|| StorageError::Corrupt(format!("invalid activity action: {}", action)))?,
        details: column(row, "details")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
