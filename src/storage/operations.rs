use std::collections::VecDeque;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{AccountId, Operation, OperationId, OperationKind};

use super::{
    StorageError, StorageResult, column, format_timestamp, map_sqlx_error, parse_timestamp,
};

const OPERATION_COLUMNS: &str = "id, sequence, account_identity, kind, amount_cents, details, \
                                 counterparty, linked_operation, created_at";

/// Default number of records fetched per cursor page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Which records a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationSelector {
    All,
    Account(AccountId),
    Kind(OperationKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Append-only log of balance-affecting events.
///
/// Like [`AccountStore`](super::AccountStore) it borrows a connection, so an
/// append commits or rolls back together with the balance change it records.
pub struct OperationLog<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> OperationLog<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Append a record. Assigns the next sequence number and clamps the
    /// timestamp so it never precedes the account's previous record.
    pub async fn append(&mut self, operation: &mut Operation) -> StorageResult<OperationId> {
        operation.sequence = self.next_sequence().await?;

        let mut created_at = operation.created_at.trunc_subsecs(6);
        if let Some(last) = self.last_activity(&operation.account).await? {
            created_at = created_at.max(last);
        }
        operation.created_at = created_at;

        sqlx::query(&format!(
            "INSERT INTO operations ({OPERATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(operation.id.to_string())
        .bind(operation.sequence)
        .bind(&operation.account)
        .bind(operation.kind.as_str())
        .bind(operation.amount)
        .bind(&operation.details)
        .bind(&operation.counterparty)
        .bind(operation.linked_operation.map(|id| id.to_string()))
        .bind(format_timestamp(&operation.created_at))
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("append operation", e))?;

        Ok(operation.id)
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(&mut self) -> StorageResult<i64> {
        sqlx::query_scalar(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'operation_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("next operation sequence", e))
    }

    /// Get a record by ID.
    pub async fn get(&mut self, id: OperationId) -> StorageResult<Option<Operation>> {
        let row = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("fetch operation", e))?;

        row.as_ref().map(row_to_operation).transpose()
    }

    /// Fetch one page of records, continuing after `after_sequence` in the given order.
    pub async fn page(
        &mut self,
        selector: &OperationSelector,
        order: Order,
        after_sequence: Option<i64>,
        limit: usize,
    ) -> StorageResult<Vec<Operation>> {
        let mut query = format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE 1=1");

        match selector {
            OperationSelector::All => {}
            OperationSelector::Account(_) => query.push_str(" AND account_identity = ?"),
            OperationSelector::Kind(_) => query.push_str(" AND kind = ?"),
        }

        if after_sequence.is_some() {
            query.push_str(match order {
                Order::NewestFirst => " AND sequence < ?",
                Order::OldestFirst => " AND sequence > ?",
            });
        }

        query.push_str(match order {
            Order::NewestFirst => " ORDER BY sequence DESC",
            Order::OldestFirst => " ORDER BY sequence ASC",
        });
        query.push_str(" LIMIT ?");

        let mut sql_query = sqlx::query(&query);
        match selector {
            OperationSelector::All => {}
            OperationSelector::Account(identity) => sql_query = sql_query.bind(identity),
            OperationSelector::Kind(kind) => sql_query = sql_query.bind(kind.as_str()),
        }
        if let Some(sequence) = after_sequence {
            sql_query = sql_query.bind(sequence);
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sql_query
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("list operations", e))?;

        rows.iter().map(row_to_operation).collect()
    }

    /// Most recent records of an account, newest first.
    pub async fn recent_by_account(
        &mut self,
        identity: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Operation>> {
        let selector = OperationSelector::Account(identity.to_string());
        self.page(&selector, Order::NewestFirst, None, limit.unwrap_or(usize::MAX))
            .await
    }

    /// Count records of an account.
    pub async fn count_by_account(&mut self, identity: &str) -> StorageResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM operations WHERE account_identity = ?")
            .bind(identity)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("count operations", e))
    }

    /// Timestamp of an account's latest record.
    pub async fn last_activity(&mut self, identity: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let last: Option<String> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM operations WHERE account_identity = ?")
                .bind(identity)
                .fetch_one(&mut *self.conn)
                .await
                .map_err(|e| map_sqlx_error("last activity", e))?;

        last.map(|s| parse_timestamp(&s, "created_at")).transpose()
    }

    /// Every record in commit order.
    pub async fn all(&mut self) -> StorageResult<Vec<Operation>> {
        self.page(&OperationSelector::All, Order::OldestFirst, None, usize::MAX)
            .await
    }

    /// Erase every record of an account. Only used when an account is purged.
    pub async fn purge_account(&mut self, identity: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM operations WHERE account_identity = ?")
            .bind(identity)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("purge operations", e))?;
        Ok(result.rows_affected())
    }
}

/// A lazy, finite, restartable listing of operation records.
///
/// Records are fetched in pages by sequence number, so records appended after
/// the cursor passed their position are not revisited and none is returned twice.
/// [`rewind`](Self::rewind) starts the listing over from the beginning.
#[derive(Debug, Clone)]
pub struct OperationCursor {
    pool: SqlitePool,
    selector: OperationSelector,
    order: Order,
    page_size: usize,
    buffer: VecDeque<Operation>,
    last_sequence: Option<i64>,
    exhausted: bool,
}

impl OperationCursor {
    pub fn new(pool: SqlitePool, selector: OperationSelector, order: Order) -> Self {
        Self {
            pool,
            selector,
            order,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            last_sequence: None,
            exhausted: false,
        }
    }

    /// Records of one account in the given order.
    pub fn by_account(pool: SqlitePool, identity: impl Into<AccountId>, order: Order) -> Self {
        Self::new(pool, OperationSelector::Account(identity.into()), order)
    }

    /// Records of one kind across all accounts in the given order.
    pub fn by_kind(pool: SqlitePool, kind: OperationKind, order: Order) -> Self {
        Self::new(pool, OperationSelector::Kind(kind), order)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Next record, or `None` once the listing is exhausted.
    pub async fn next(&mut self) -> StorageResult<Option<Operation>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Start over from the first record.
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.last_sequence = None;
        self.exhausted = false;
    }

    /// Drain the remaining records into a vector.
    pub async fn collect_remaining(&mut self) -> StorageResult<Vec<Operation>> {
        let mut operations = Vec::new();
        while let Some(op) = self.next().await? {
            operations.push(op);
        }
        Ok(operations)
    }

    async fn fetch_page(&mut self) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire connection", e))?;

        let page = OperationLog::new(&mut conn)
            .page(&self.selector, self.order, self.last_sequence, self.page_size)
            .await?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.last_sequence = Some(last.sequence);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

fn row_to_operation(row: &SqliteRow) -> StorageResult<Operation> {
    let id: String = column(row, "id")?;
    let kind: String = column(row, "kind")?;
    let linked: Option<String> = column(row, "linked_operation")?;
    let created_at: String = column(row, "created_at")?;

    Ok(Operation {
        id: parse_uuid(&id, "id")?,
        sequence: column(row, "sequence")?,
        account: column(row, "account_identity")?,
        kind: OperationKind::from_str(&kind)
            .ok_or_else(|| StorageError::Corrupt(format!("invalid operation kind: {}", kind)))?,
        amount: column(row, "amount_cents")?,
        details: column(row, "details")?,
        counterparty: column(row, "counterparty")?,
        linked_operation: linked
            .map(|s| parse_uuid(&s, "linked_operation"))
            .transpose()?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn parse_uuid(value: &str, field: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::Corrupt(format!("invalid {} {:?}: {}", field, value, e)))
}
