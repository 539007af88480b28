mod common;

use anyhow::Result;
use clap::Parser;
use coffer::application::{LedgerError, LedgerService};
use coffer::cli::Cli;
use coffer::domain::ActivityAction;
use common::test_config;
use tempfile::TempDir;

async fn coffer(temp: &TempDir, args: &[&str]) -> Result<()> {
    let database = temp.path().join("test.db");
    let database = database.to_str().unwrap();
    let mut argv = vec!["coffer", "--database", database];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv)?.run().await
}

#[tokio::test]
async fn test_register_with_invalid_name_creates_nothing() -> Result<()> {
    let temp = TempDir::new()?;
    coffer(&temp, &["init"]).await?;

    assert!(coffer(&temp, &["register", "X", "--name", "ab"]).await.is_err());

    let service = LedgerService::connect(test_config(&temp)).await?;
    assert!(matches!(
        service.queries().account("X").await,
        Err(LedgerError::AccountNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_register_with_name_does_not_rename_existing_account() -> Result<()> {
    let temp = TempDir::new()?;
    coffer(&temp, &["init"]).await?;

    coffer(&temp, &["register", "X", "--name", "Alice"]).await?;
    coffer(&temp, &["register", "X", "--name", "Mallory"]).await?;

    let service = LedgerService::connect(test_config(&temp)).await?;
    let queries = service.queries();
    let account = queries.account("X").await?;
    assert_eq!(account.display_name.as_deref(), Some("Alice"));

    // One registration entry and no rename
    let activity = queries.activity("X", None).await?;
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].action, ActivityAction::Registered);
    assert_eq!(activity[0].details, "Account registered as Alice");
    Ok(())
}
