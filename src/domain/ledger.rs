use std::collections::HashMap;

use serde::Serialize;

use super::{Account, AccountId, AmountSign, Cents, Operation, OperationId, OperationKind};

/// Compute the balance implied by an account's operation records.
/// Balance = sum of signed amounts recorded against the account.
pub fn compute_balance(account: &str, operations: &[Operation]) -> Cents {
    operations
        .iter()
        .filter(|op| op.account == account)
        .map(|op| op.amount)
        .sum()
}

/// Compute implied balances for every account that has records.
pub fn compute_all_balances(operations: &[Operation]) -> HashMap<AccountId, Cents> {
    let mut balances: HashMap<AccountId, Cents> = HashMap::new();
    for op in operations {
        *balances.entry(op.account.clone()).or_insert(0) += op.amount;
    }
    balances
}

/// Whether a record's amount has the sign its kind requires.
pub fn amount_matches_kind(op: &Operation) -> bool {
    match op.kind.sign() {
        AmountSign::Positive => op.amount > 0,
        AmountSign::Negative => op.amount < 0,
        AmountSign::Any => true,
    }
}

/// Whether two records form the two halves of one transfer.
pub fn is_transfer_pair(debit: &Operation, credit: &Operation) -> bool {
    debit.linked_operation == Some(credit.id)
        && credit.linked_operation == Some(debit.id)
        && debit.amount == -credit.amount
        && debit.counterparty.as_deref() == Some(credit.account.as_str())
        && credit.counterparty.as_deref() == Some(debit.account.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub identity: AccountId,
    pub stored: Cents,
    pub recorded: Cents,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub operation_count: i64,
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<AccountId>,
    pub unpaired_transfers: i64,
    pub invalid_amounts: i64,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.balance_mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.unpaired_transfers == 0
            && self.invalid_amounts == 0
    }
}

/// Check stored balances and records against each other.
///
/// Looks for stored balances that differ from the sum of their records,
/// negative balances, transfer records without a matching mirror, and amounts
/// whose sign contradicts their kind. A transfer record whose counterparty was
/// purged afterwards has lost its mirror legitimately and is not counted.
pub fn build_integrity_report(accounts: &[Account], operations: &[Operation]) -> IntegrityReport {
    let mut report = IntegrityReport {
        account_count: accounts.len() as i64,
        operation_count: operations.len() as i64,
        ..Default::default()
    };

    let recorded = compute_all_balances(operations);
    for account in accounts {
        if account.balance < 0 {
            report.negative_balances.push(account.identity.clone());
        }
        let implied = recorded.get(&account.identity).copied().unwrap_or(0);
        if implied != account.balance {
            report.balance_mismatches.push(BalanceMismatch {
                identity: account.identity.clone(),
                stored: account.balance,
                recorded: implied,
            });
        }
    }

    let by_id: HashMap<OperationId, &Operation> = operations.iter().map(|op| (op.id, op)).collect();
    for op in operations {
        if !amount_matches_kind(op) {
            report.invalid_amounts += 1;
        }

        let mirror = op.linked_operation.and_then(|id| by_id.get(&id).copied());
        let paired = match (op.kind, mirror) {
            (OperationKind::TransferOut, Some(credit)) => is_transfer_pair(op, credit),
            (OperationKind::TransferIn, Some(debit)) => is_transfer_pair(debit, op),
            (OperationKind::TransferOut | OperationKind::TransferIn, None) => false,
            _ => continue,
        };
        if !paired && counterparty_predates(op, accounts) {
            report.unpaired_transfers += 1;
        }
    }

    report
}

/// Whether the record's counterparty is an account that already existed when
/// the record was written.
fn counterparty_predates(op: &Operation, accounts: &[Account]) -> bool {
    accounts.iter().any(|account| {
        op.counterparty.as_deref() == Some(account.identity.as_str())
            && account.created_at <= op.created_at
    })
}
