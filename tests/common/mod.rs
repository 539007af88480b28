// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use coffer::application::LedgerService;
use coffer::config::LedgerConfig;
use tempfile::TempDir;

/// Settings for a database file inside `temp_dir`
pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    let db_path = temp_dir.path().join("test.db");
    LedgerConfig::for_path(db_path.to_str().unwrap())
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(test_config(&temp_dir)).await?;
    Ok((service, temp_dir))
}

/// Test service tuned for many concurrent writers on few accounts
pub async fn contended_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig {
        max_connections: 8,
        busy_timeout_ms: 30_000,
        acquire_timeout_ms: 30_000,
        max_conflict_retries: 10_000,
        ..test_config(&temp_dir)
    };
    let service = LedgerService::init(config).await?;
    Ok((service, temp_dir))
}

/// Register accounts and fund each with the given amount
pub async fn funded_accounts(
    service: &LedgerService,
    identities: &[&str],
    amount: i64,
) -> Result<()> {
    for identity in identities {
        service.register(identity).await?;
        if amount > 0 {
            service.deposit(identity, amount).await?;
        }
    }
    Ok(())
}
