use std::collections::HashMap;

use serde::Serialize;

use super::{Cents, Transaction, User, UserId};

/// Sum of signed amounts of every row owned by `user_id`.
pub fn compute_balance(user_id: UserId, transactions: &[Transaction]) -> Cents {
    transactions
        .iter()
        .filter(|t| t.user_id == Some(user_id))
        .map(|t| t.amount)
        .sum()
}

/// Per-user sums of signed amounts. Users without rows are absent (balance 0).
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<UserId, Cents> {
    let mut balances: HashMap<UserId, Cents> = HashMap::new();
    for transaction in transactions {
        if let Some(user_id) = transaction.user_id {
            *balances.entry(user_id).or_insert(0) += transaction.amount;
        }
    }
    balances
}

/// A user whose stored balance disagrees with its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub user_id: UserId,
    pub stored: Cents,
    pub computed: Cents,
}

/// Result of checking the ledger-consistency invariants over a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub user_count: usize,
    pub transaction_count: usize,
    pub mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<UserId>,
    /// Rows pointing at a user that no longer exists (or never did)
    pub orphaned_rows: usize,
    /// Rows whose kind disagrees with their amount's sign
    pub misclassified_rows: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.orphaned_rows == 0
            && self.misclassified_rows == 0
    }
}

/// Compare every user's stored balance against its ledger rows.
pub fn check_consistency(users: &[User], transactions: &[Transaction]) -> ConsistencyReport {
    let computed = compute_all_balances(transactions);
    let mut report = ConsistencyReport {
        user_count: users.len(),
        transaction_count: transactions.len(),
        ..Default::default()
    };

    for user in users {
        let sum = computed.get(&user.id).copied().unwrap_or(0);
        if sum != user.balance {
            report.mismatches.push(BalanceMismatch {
                user_id: user.id,
                stored: user.balance,
                computed: sum,
            });
        }
        if user.balance < 0 {
            report.negative_balances.push(user.id);
        }
    }

    let known: std::collections::HashSet<UserId> = users.iter().map(|u| u.id).collect();
    report.orphaned_rows = transactions
        .iter()
        .filter(|t| t.user_id.is_some_and(|id| !known.contains(&id)))
        .count();
    report.misclassified_rows = transactions
        .iter()
        .filter(|t| super::TransactionKind::from_amount(t.amount) != Some(t.kind))
        .count();

    report
}
