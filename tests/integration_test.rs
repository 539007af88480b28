mod common;

use anyhow::Result;
use coffer::application::{DeletePolicy, LedgerError, LedgerService};
use coffer::config::LedgerConfig;
use coffer::domain::{AccountStatus, ActivityAction, OperationKind};
use common::{funded_accounts, test_config, test_service};
use tempfile::TempDir;

#[tokio::test]
async fn test_basic_account_scenario() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();

    service.register("A").await?;
    let receipt = service.deposit("A", 10000).await?;
    assert_eq!(receipt.balance, 10000);

    let err = service.withdraw("A", 15000).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            balance: 10000,
            required: 15000,
            ..
        }
    ));
    assert_eq!(queries.balance("A").await?, 10000);

    service.register("B").await?;
    let transfer = service.transfer("A", "B", 4000).await?;
    assert_eq!(transfer.from_balance, 6000);
    assert_eq!(transfer.to_balance, 4000);
    assert_eq!(queries.balance("A").await?, 6000);
    assert_eq!(queries.balance("B").await?, 4000);

    let history = queries.history("A", None).await?;
    let kinds: Vec<_> = history.iter().map(|op| op.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::TransferOut,
            OperationKind::Deposit,
            OperationKind::Adjustment
        ]
    );
    assert_eq!(history[0].amount, -4000);
    assert_eq!(history[0].counterparty.as_deref(), Some("B"));

    service.delete_account("A", DeletePolicy::Retain).await?;
    let err = queries.balance("A").await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));
    assert_eq!(err.code(), "not_found");

    Ok(())
}

#[tokio::test]
async fn test_register_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let first = service.register("alice").await?;
    service.deposit("alice", 2500).await?;
    let second = service.register("  alice ").await?;

    assert_eq!(second.identity, first.identity);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.balance, 2500);

    // Only one opening record despite the second registration
    let history = service.queries().history("alice", None).await?;
    assert_eq!(history.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_strict_create_rejects_existing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let account = service.create_account("A").await?;
    assert_eq!(account.balance, 0);

    let err = service.create_account("A").await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(ref id) if id == "A"));
    assert_eq!(err.code(), "already_exists");

    // The idempotent path still accepts it
    service.register("A").await?;

    Ok(())
}

#[tokio::test]
async fn test_opening_record_can_be_disabled() -> Result<()> {
    let temp = TempDir::new()?;
    let config = LedgerConfig {
        record_account_opening: false,
        ..test_config(&temp)
    };
    let service = LedgerService::init(config).await?;

    service.register("A").await?;
    assert!(service.queries().history("A", None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A", "B"], 1000).await?;

    assert!(matches!(
        service.register("   ").await,
        Err(LedgerError::InvalidIdentity(_))
    ));
    assert!(matches!(
        service.deposit("A", 0).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        service.withdraw("A", -100).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        service.transfer("A", "B", 0).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        service.transfer("A", "A", 100).await,
        Err(LedgerError::SameAccount(_))
    ));
    assert!(matches!(
        service.deposit("nobody", 100).await,
        Err(LedgerError::AccountNotFound(_))
    ));

    // Nothing above touched the balances
    assert_eq!(service.queries().balance("A").await?, 1000);
    assert_eq!(service.queries().balance("B").await?, 1000);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_entire_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A"], 5000).await?;

    let receipt = service.withdraw("A", 5000).await?;
    assert_eq!(receipt.balance, 0);
    assert_eq!(receipt.operation.kind, OperationKind::Withdrawal);
    assert_eq!(receipt.operation.amount, -5000);

    assert!(matches!(
        service.withdraw("A", 1).await,
        Err(LedgerError::InsufficientFunds { balance: 0, .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_deposit_overflow_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A"], i64::MAX).await?;

    assert!(matches!(
        service.deposit("A", 1).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert_eq!(service.queries().balance("A").await?, i64::MAX);

    Ok(())
}

// ========================
// Account lifecycle
// ========================

#[tokio::test]
async fn test_retained_account_keeps_history_and_reserves_identity() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    funded_accounts(&service, &["A"], 3000).await?;

    let deleted = service.delete_account("A", DeletePolicy::Retain).await?;
    assert_eq!(deleted.account.status(), AccountStatus::Deleted);
    assert_eq!(deleted.purged_operations, 0);

    // History stays readable
    assert_eq!(queries.history("A", None).await?.len(), 2);

    assert!(matches!(
        service.deposit("A", 100).await,
        Err(LedgerError::AccountNotFound(_))
    ));
    assert!(matches!(
        service.delete_account("A", DeletePolicy::Retain).await,
        Err(LedgerError::AccountNotFound(_))
    ));

    let err = service.register("A").await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountGone(_)));
    assert_eq!(err.code(), "account_gone");

    Ok(())
}

#[tokio::test]
async fn test_purged_account_can_be_registered_again() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    funded_accounts(&service, &["A", "B"], 3000).await?;
    service.transfer("A", "B", 1000).await?;

    let deleted = service.delete_account("A", DeletePolicy::Purge).await?;
    assert_eq!(deleted.purged_operations, 3);
    assert!(matches!(
        queries.history("A", None).await,
        Err(LedgerError::AccountNotFound(_))
    ));

    let fresh = service.register("A").await?;
    assert_eq!(fresh.balance, 0);
    assert_eq!(queries.history("A", None).await?.len(), 1);

    // B's side of the old transfer is intact and still consistent
    assert_eq!(queries.balance("B").await?, 4000);
    assert!(queries.check_integrity().await?.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_account() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for policy in [DeletePolicy::Retain, DeletePolicy::Purge] {
        assert!(matches!(
            service.delete_account("ghost", policy).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    Ok(())
}

#[tokio::test]
async fn test_display_names() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.register("1001").await?;

    let account = service.set_display_name("1001", Some("  Alice  ")).await?;
    assert_eq!(account.display_name.as_deref(), Some("Alice"));
    assert_eq!(account.label(), "Alice");

    assert!(matches!(
        service.set_display_name("1001", Some("Al")).await,
        Err(LedgerError::InvalidDisplayName(_))
    ));
    assert!(matches!(
        service.set_display_name("1001", Some("a name that is far too long")).await,
        Err(LedgerError::InvalidDisplayName(_))
    ));

    let cleared = service.set_display_name("1001", None).await?;
    assert_eq!(cleared.display_name, None);
    assert_eq!(cleared.label(), "1001");

    assert!(matches!(
        service.set_display_name("ghost", Some("Ghost")).await,
        Err(LedgerError::AccountNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_register_named_validates_before_writing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert!(matches!(
        service.register_named("X", Some("ab")).await,
        Err(LedgerError::InvalidDisplayName(_))
    ));
    assert!(matches!(
        service.queries().account("X").await,
        Err(LedgerError::AccountNotFound(_))
    ));

    let created = service.register_named("X", Some(" Alice ")).await?;
    assert_eq!(created.display_name.as_deref(), Some("Alice"));

    // Existing account comes back unchanged
    let again = service.register_named("X", Some("Mallory")).await?;
    assert_eq!(again.display_name.as_deref(), Some("Alice"));

    Ok(())
}

// ========================
// Activity journal
// ========================

#[tokio::test]
async fn test_activity_records_lifecycle_newest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();

    service.register("A").await?;
    service.deposit("A", 500).await?;
    service.set_display_name("A", Some("Alice")).await?;
    service.set_display_name("A", None).await?;
    service.delete_account("A", DeletePolicy::Retain).await?;

    let activity = queries.activity("A", None).await?;
    let actions: Vec<_> = activity.iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::Deleted,
            ActivityAction::Renamed,
            ActivityAction::Renamed,
            ActivityAction::Registered,
        ]
    );
    assert_eq!(activity[1].details, "Display name cleared");
    assert_eq!(activity[2].details, "Display name set to Alice");
    assert!(activity.windows(2).all(|w| w[0].id > w[1].id));

    assert_eq!(queries.activity("A", Some(1)).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_writes_leave_no_activity() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.register("A").await?;

    assert!(service.set_display_name("A", Some("x")).await.is_err());
    assert!(service.set_display_name("ghost", Some("Ghost")).await.is_err());
    service.register("A").await?;

    let activity = service.queries().activity("A", None).await?;
    assert_eq!(activity.len(), 1);
    assert!(matches!(
        service.queries().activity("ghost", None).await,
        Err(LedgerError::AccountNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_purge_leaves_only_purge_entry() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    funded_accounts(&service, &["A"], 700).await?;
    service.set_display_name("A", Some("Alice")).await?;

    service.delete_account("A", DeletePolicy::Purge).await?;
    let activity = queries.activity("A", None).await?;
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].action, ActivityAction::Purged);
    assert_eq!(activity[0].details, "Account purged with 2 records");

    service.register("A").await?;
    let actions: Vec<_> = queries
        .activity("A", None)
        .await?
        .iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(actions, vec![ActivityAction::Registered, ActivityAction::Purged]);

    Ok(())
}

#[tokio::test]
async fn test_find_by_display_name() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    service.register_named("1001", Some("Alice")).await?;
    service.register_named("1002", Some("Alice")).await?;
    service.register_named("1003", Some("Bob")).await?;
    service.delete_account("1002", DeletePolicy::Retain).await?;

    let found = queries.find_by_display_name(" Alice ").await?;
    let identities: Vec<_> = found.iter().map(|a| a.identity.as_str()).collect();
    assert_eq!(identities, vec!["1001"]);

    assert!(queries.find_by_display_name("Carol").await?.is_empty());
    assert!(matches!(
        queries.find_by_display_name("x").await,
        Err(LedgerError::InvalidDisplayName(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_queries_reject_malformed_identities() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    let too_long = "x".repeat(65);

    for identity in ["", "   ", too_long.as_str()] {
        let err = queries.balance(identity).await.unwrap_err();
        assert_eq!(err.code(), "invalid_identity");
        assert!(matches!(
            queries.history(identity, None).await,
            Err(LedgerError::InvalidIdentity(_))
        ));
        assert!(matches!(
            queries.history_cursor(identity).await,
            Err(LedgerError::InvalidIdentity(_))
        ));
        assert!(matches!(
            queries.account_info(identity).await,
            Err(LedgerError::InvalidIdentity(_))
        ));
        assert!(matches!(
            queries.activity(identity, None).await,
            Err(LedgerError::InvalidIdentity(_))
        ));
    }

    // Well-formed but unknown is still not_found
    assert_eq!(queries.balance("ghost").await.unwrap_err().code(), "not_found");

    Ok(())
}

// ========================
// Projections
// ========================

#[tokio::test]
async fn test_system_totals_and_listing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let queries = service.queries();
    funded_accounts(&service, &["A", "B", "C"], 1000).await?;
    service.transfer("A", "C", 250).await?;
    service.withdraw("B", 100).await?;

    let totals = queries.system_totals().await?;
    assert_eq!(totals.account_count, 3);
    assert_eq!(totals.sum_of_balances, 2900);

    service.delete_account("C", DeletePolicy::Retain).await?;
    let totals = queries.system_totals().await?;
    assert_eq!(totals.account_count, 2);
    assert_eq!(totals.sum_of_balances, 1650);

    assert_eq!(queries.list_accounts(false).await?.len(), 2);
    assert_eq!(queries.list_accounts(true).await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_account_info() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A"], 1000).await?;
    let receipt = service.withdraw("A", 300).await?;

    let info = service.queries().account_info("A").await?;
    assert_eq!(info.account.balance, 700);
    assert_eq!(info.operation_count, 3);
    assert_eq!(info.last_activity, Some(receipt.operation.created_at));

    Ok(())
}

#[tokio::test]
async fn test_operation_lookup() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A", "B"], 1000).await?;
    let receipt = service.transfer("A", "B", 100).await?;

    let queries = service.queries();
    let debit = queries.operation(receipt.debit.id).await?;
    assert_eq!(debit, receipt.debit);
    assert_eq!(debit.linked_operation, Some(receipt.credit.id));

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        queries.operation(missing).await,
        Err(LedgerError::OperationNotFound(id)) if id == missing
    ));

    Ok(())
}

#[tokio::test]
async fn test_integrity_check_on_healthy_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_accounts(&service, &["A", "B"], 5000).await?;
    service.transfer("A", "B", 1200).await?;
    service.withdraw("B", 200).await?;
    service.delete_account("A", DeletePolicy::Retain).await?;

    let report = service.queries().check_integrity().await?;
    assert!(report.is_ok(), "unexpected issues: {:?}", report);
    assert_eq!(report.account_count, 2);
    assert_eq!(report.operation_count, 7);

    Ok(())
}

#[tokio::test]
async fn test_data_survives_reconnect() -> Result<()> {
    let temp = TempDir::new()?;
    let service = LedgerService::init(test_config(&temp)).await?;
    funded_accounts(&service, &["A"], 4200).await?;
    service.close().await;

    let service = LedgerService::connect(test_config(&temp)).await?;
    assert_eq!(service.queries().balance("A").await?, 4200);

    Ok(())
}
