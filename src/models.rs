//! Flat record types for the two persisted entities. `User` and `Transaction`
//! carry ids only — no inline nested records — so hydration is always an
//! explicit lookup rather than a partially-populated struct.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Win,
    Lost,
}

impl TransactionState {
    /// The signed delta this state applies to a balance.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            TransactionState::Win => amount,
            TransactionState::Lost => -amount,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Win => "win",
            TransactionState::Lost => "lost",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(TransactionState::Win),
            "lost" => Ok(TransactionState::Lost),
            _ => Err(()),
        }
    }
}

/// A user's wallet row. Never deleted by the core; mutated only through
/// [`crate::ledger::LedgerStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub balance: Decimal,
    pub account: Option<String>,
}

/// A transaction row as it exists in `transactions`, after a successful read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub transaction_id: String,
    pub state: TransactionState,
    pub amount: Decimal,
    pub source_id: i64,
    pub user_id: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// The in-memory shape a caller hands to [`crate::ledger::LedgerStore::post_transaction`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: String,
    pub state: TransactionState,
    pub amount: Decimal,
    pub source_id: i64,
    pub user_id: String,
}

/// Result of a successful (or insufficient-funds) post.
#[derive(Debug, Clone, Serialize)]
pub struct PostedTransaction {
    pub user_id: String,
    pub balance_after: Decimal,
    pub transaction_id: String,
    pub processed: bool,
}

/// One row of a cancel-sweep result.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledTransaction {
    pub user_id: String,
    pub balance_after: Decimal,
    pub transaction_id: String,
    pub state: TransactionState,
    pub amount: Decimal,
}
