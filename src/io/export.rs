use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerQueries;
use crate::domain::{Account, Activity, Operation};

/// Full ledger snapshot for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub activity: Vec<Activity>,
}

/// Exporter for converting ledger data to CSV or JSON
pub struct Exporter<'a> {
    queries: &'a LedgerQueries,
}

impl<'a> Exporter<'a> {
    pub fn new(queries: &'a LedgerQueries) -> Self {
        Self { queries }
    }

    /// Export accounts, deleted ones included, to CSV format
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.queries.list_accounts(true).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "identity",
            "display_name",
            "balance_cents",
            "status",
            "created_at",
            "deleted_at",
        ])?;

        for account in &accounts {
            csv_writer.write_record([
                account.identity.clone(),
                account.display_name.clone().unwrap_or_default(),
                account.balance.to_string(),
                account.status().as_str().to_string(),
                rfc3339(&account.created_at),
                account.deleted_at.as_ref().map(rfc3339).unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export every operation record in commit order to CSV format
    pub async fn export_operations_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut cursor = self.queries.all_operations();
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "account",
            "kind",
            "amount_cents",
            "details",
            "counterparty",
            "linked_operation",
            "created_at",
        ])?;

        let mut count = 0;
        while let Some(operation) = cursor.next().await? {
            csv_writer.write_record([
                operation.id.to_string(),
                operation.sequence.to_string(),
                operation.account,
                operation.kind.as_str().to_string(),
                operation.amount.to_string(),
                operation.details,
                operation.counterparty.unwrap_or_default(),
                operation
                    .linked_operation
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                rfc3339(&operation.created_at),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export accounts, operations and activity as one consistent JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let contents = self.queries.contents().await?;

        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts: contents.accounts,
            operations: contents.operations,
            activity: contents.activity,
        };

        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        Ok(snapshot)
    }
}

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
