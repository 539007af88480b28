use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{DeletePolicy, LedgerQueries, LedgerService};
use crate::config::LedgerConfig;
use crate::domain::{Account, Activity, Operation, OperationKind, format_cents, parse_cents};
use crate::telemetry;

/// Coffer - account balance ledger
#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Per-account balances with an append-only operation history")]
#[command(version)]
pub struct Cli {
    /// Database file path (defaults to COFFER_DATABASE_URL or coffer.db)
    #[arg(short, long, env = "COFFER_DATABASE")]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register an account (no-op if it already exists)
    Register {
        /// Account identity
        identity: String,

        /// Display name for a new account (3 to 20 characters)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Add money to an account
    Deposit {
        identity: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Take money out of an account
    Withdraw {
        identity: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account
        #[arg(long)]
        from: String,

        /// Destination account
        #[arg(long)]
        to: String,
    },

    /// Show balance for an account or all accounts
    Balance {
        /// Account identity (omit for all accounts)
        identity: Option<String>,
    },

    /// List an account's operations, most recent first
    History {
        identity: String,

        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete an account
    Delete {
        identity: String,

        /// Erase the account's history too, freeing the identity
        #[arg(long)]
        purge: bool,
    },

    /// Set or clear an account's display name
    Rename {
        identity: String,

        /// New display name (omit to clear)
        name: Option<String>,
    },

    /// List accounts
    Accounts {
        /// Include deleted accounts
        #[arg(long)]
        all: bool,
    },

    /// Show detailed account information
    Info { identity: String },

    /// Show an account's lifecycle activity, most recent first
    Activity {
        identity: String,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Find active accounts by display name
    Find { name: String },

    /// Show the number of accounts and the sum of their balances
    Totals,

    /// List operations of one kind across all accounts
    Audit {
        /// deposit, withdrawal, transfer_out, transfer_in, adjustment
        #[arg(short, long)]
        kind: String,

        /// Maximum number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: accounts, operations, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json (default: csv, json for full)
        #[arg(short, long)]
        format: Option<String>,
    },
}

impl Cli {
    fn config(&self) -> Result<LedgerConfig> {
        let mut config = LedgerConfig::from_env().context("Invalid COFFER_* configuration")?;
        if let Some(path) = &self.database {
            config.database_url = LedgerConfig::for_path(path).database_url;
        }
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        telemetry::init(if self.verbose { "debug" } else { "info" });

        let config = self.config()?;
        let service = match self.command {
            Commands::Init => LedgerService::init(config).await?,
            _ => LedgerService::connect(config).await?,
        };
        let queries = service.queries();

        let result = run_command(&service, &queries, self.command).await;
        service.close().await;
        result
    }
}

async fn run_command(
    service: &LedgerService,
    queries: &LedgerQueries,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Database initialized: {}", service.config().database_url);
        }

        Commands::Register { identity, name } => {
            let account = service.register_named(&identity, name.as_deref()).await?;
            println!("Registered account: {}", account.label());
            if name.is_some_and(|name| account.display_name.as_deref() != Some(name.trim())) {
                eprintln!("Account already existed; use `coffer rename` to change its name");
            }
        }

        Commands::Deposit { identity, amount } => {
            let amount = parse_amount(&amount)?;
            let receipt = service.deposit(&identity, amount).await?;
            println!(
                "Deposited {} to {} (balance {})",
                format_cents(amount),
                receipt.operation.account,
                format_cents(receipt.balance)
            );
        }

        Commands::Withdraw { identity, amount } => {
            let amount = parse_amount(&amount)?;
            let receipt = service.withdraw(&identity, amount).await?;
            println!(
                "Withdrew {} from {} (balance {})",
                format_cents(amount),
                receipt.operation.account,
                format_cents(receipt.balance)
            );
        }

        Commands::Transfer { amount, from, to } => {
            let amount = parse_amount(&amount)?;
            let receipt = service.transfer(&from, &to, amount).await?;
            println!(
                "Transferred {} {} -> {} ({})",
                format_cents(amount),
                receipt.debit.account,
                receipt.credit.account,
                receipt.debit.id
            );
            println!(
                "  {}: {}   {}: {}",
                receipt.debit.account,
                format_cents(receipt.from_balance),
                receipt.credit.account,
                format_cents(receipt.to_balance)
            );
        }

        Commands::Balance { identity } => run_balance_command(queries, identity).await?,

        Commands::History { identity, limit } => {
            let operations = queries.history(&identity, limit).await?;
            print_operations(&operations);
        }

        Commands::Delete { identity, purge } => {
            let policy = if purge {
                DeletePolicy::Purge
            } else {
                DeletePolicy::Retain
            };
            let deleted = service.delete_account(&identity, policy).await?;
            match deleted.policy {
                DeletePolicy::Retain => println!(
                    "Deleted account: {} (history retained)",
                    deleted.account.identity
                ),
                DeletePolicy::Purge => println!(
                    "Purged account: {} ({} operations erased)",
                    deleted.account.identity, deleted.purged_operations
                ),
            }
        }

        Commands::Rename { identity, name } => {
            let account = service.set_display_name(&identity, name.as_deref()).await?;
            println!("Account {} is now shown as {}", account.identity, account.label());
        }

        Commands::Accounts { all } => {
            let accounts = queries.list_accounts(all).await?;
            print_accounts(&accounts);
        }

        Commands::Info { identity } => {
            let info = queries.account_info(&identity).await?;
            let account = &info.account;
            println!("Account: {}", account.identity);
            if let Some(name) = &account.display_name {
                println!("  Name:        {}", name);
            }
            println!("  Balance:     {}", format_cents(account.balance));
            println!("  Operations:  {}", info.operation_count);
            println!(
                "  Created:     {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(last) = info.last_activity {
                println!("  Last active: {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }

        Commands::Activity { identity, limit } => {
            let entries = queries.activity(&identity, limit).await?;
            print_activity(&entries);
        }

        Commands::Find { name } => {
            let accounts = queries.find_by_display_name(&name).await?;
            print_accounts(&accounts);
        }

        Commands::Totals => {
            let totals = queries.system_totals().await?;
            println!("Accounts: {}", totals.account_count);
            println!("Total:    {}", format_cents(totals.sum_of_balances));
        }

        Commands::Audit { kind, limit } => {
            let kind = OperationKind::from_str(&kind).with_context(|| {
                let valid: Vec<_> = OperationKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("Invalid kind '{}'. Valid kinds: {}", kind, valid.join(", "))
            })?;
            let mut cursor = queries.operations_by_kind(kind);
            let mut operations = Vec::new();
            while operations.len() < limit {
                match cursor.next().await? {
                    Some(operation) => operations.push(operation),
                    None => break,
                }
            }
            print_operations(&operations);
        }

        Commands::Check => run_check_command(queries).await?,

        Commands::Export {
            export_type,
            output,
            format,
        } => run_export_command(queries, &export_type, output.as_deref(), format.as_deref()).await?,
    }

    Ok(())
}

fn parse_amount(raw: &str) -> Result<i64> {
    parse_cents(raw).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", raw))
}

async fn run_balance_command(queries: &LedgerQueries, identity: Option<String>) -> Result<()> {
    match identity {
        Some(identity) => {
            let account = queries.account(&identity).await?;
            println!("{}: {}", account.label(), format_cents(account.balance));
        }
        None => print_accounts(&queries.list_accounts(false).await?),
    }
    Ok(())
}

fn print_accounts(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found.");
        return;
    }

    println!("{:<20} {:<20} {:>12} {:<8}", "ACCOUNT", "NAME", "BALANCE", "STATUS");
    println!("{}", "-".repeat(63));
    for account in accounts {
        println!(
            "{:<20} {:<20} {:>12} {:<8}",
            truncate(&account.identity, 20),
            account.display_name.as_deref().unwrap_or(""),
            format_cents(account.balance),
            account.status().as_str()
        );
    }
}

fn print_operations(operations: &[Operation]) {
    if operations.is_empty() {
        println!("No operations found.");
        return;
    }

    println!(
        "{:<20} {:<12} {:<13} {:>12} DETAILS",
        "DATE", "ACCOUNT", "KIND", "AMOUNT"
    );
    println!("{}", "-".repeat(80));
    for operation in operations {
        println!(
            "{:<20} {:<12} {:<13} {:>12} {}",
            operation.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&operation.account, 12),
            operation.kind.as_str(),
            format_cents(operation.amount),
            truncate(&operation.details, 30)
        );
    }
}

fn print_activity(entries: &[Activity]) {
    if entries.is_empty() {
        println!("No activity found.");
        return;
    }

    println!("{:<20} {:<11} DETAILS", "DATE", "ACTION");
    println!("{}", "-".repeat(70));
    for entry in entries {
        println!(
            "{:<20} {:<11} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            entry.details
        );
    }
}

async fn run_check_command(queries: &LedgerQueries) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = queries.check_integrity().await?;

    println!("Accounts:   {}", report.account_count);
    println!("Operations: {}", report.operation_count);
    println!();

    if report.is_ok() {
        println!("Ledger is consistent.");
        return Ok(());
    }

    println!("Issues found:");
    for mismatch in &report.balance_mismatches {
        println!(
            "  - {}: stored balance {} but operations sum to {}",
            mismatch.identity,
            format_cents(mismatch.stored),
            format_cents(mismatch.recorded)
        );
    }
    for identity in &report.negative_balances {
        println!("  - {}: negative balance", identity);
    }
    if report.unpaired_transfers > 0 {
        println!(
            "  - {} transfer records without a matching side",
            report.unpaired_transfers
        );
    }
    if report.invalid_amounts > 0 {
        println!(
            "  - {} records with an amount that contradicts their kind",
            report.invalid_amounts
        );
    }
    anyhow::bail!("Ledger integrity check failed");
}

async fn run_export_command(
    queries: &LedgerQueries,
    export_type: &str,
    output: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(queries);

    let format = match (export_type, format) {
        ("full", None) => "json",
        (_, None) => "csv",
        (_, Some(format)) => format,
    };

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match (export_type, format) {
        ("accounts", "csv") => {
            let count = exporter.export_accounts_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} accounts", count);
            }
        }
        ("operations", "csv") => {
            let count = exporter.export_operations_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} operations", count);
            }
        }
        ("accounts" | "operations" | "full", "json") => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported {} accounts and {} operations",
                    snapshot.accounts.len(),
                    snapshot.operations.len()
                );
            }
        }
        ("accounts" | "operations" | "full", _) => {
            anyhow::bail!("Invalid format '{}'. Valid formats: csv, json", format);
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: accounts, operations, full",
                export_type
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_transfer() {
        let cli = Cli::try_parse_from([
            "coffer", "--database", "x.db", "transfer", "40", "--from", "A", "--to", "B",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("x.db"));
        assert!(matches!(
            cli.command,
            Commands::Transfer { ref from, ref to, .. } if from == "A" && to == "B"
        ));
    }

    #[test]
    fn test_cli_parses_delete_purge() {
        let cli = Cli::try_parse_from(["coffer", "delete", "A", "--purge"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { purge: true, .. }));
    }

    #[test]
    fn test_cli_parses_register_with_name() {
        let cli = Cli::try_parse_from(["coffer", "register", "42", "--name", "Alice"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Register { ref identity, name: Some(ref name) }
                if identity == "42" && name == "Alice"
        ));
    }

    #[test]
    fn test_cli_parses_activity() {
        let cli = Cli::try_parse_from(["coffer", "activity", "42", "--limit", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Activity { limit: Some(5), .. }));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-identity", 10), "a-very-...");
    }
}
