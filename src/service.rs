//! The Transaction Service: validates an inbound post, resolves user and
//! source, and invokes the Ledger Store. Ordering of the checks below
//! matters — it fixes the precedence of the error a caller sees.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::ServiceError;
use crate::ledger::LedgerStore;
use crate::lookup::{SourceLookup, UserLookup};
use crate::models::{NewTransaction, PostedTransaction, TransactionState};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The caller-facing shape of a post request, prior to normalization.
#[derive(Debug, Clone)]
pub struct PostTransactionRequest {
    pub transaction_id: String,
    pub state: String,
    pub amount: String,
    pub source_name: String,
}

#[derive(Clone)]
pub struct TransactionService {
    ledger: LedgerStore,
    user_lookup: UserLookup,
    source_lookup: SourceLookup,
}

impl TransactionService {
    pub fn new(ledger: LedgerStore, user_lookup: UserLookup, source_lookup: SourceLookup) -> Self {
        Self {
            ledger,
            user_lookup,
            source_lookup,
        }
    }

    pub async fn process_transaction(
        &self,
        user_id: &str,
        req: PostTransactionRequest,
    ) -> Result<PostedTransaction, ServiceError> {
        let user_exists = tokio::time::timeout(LOOKUP_TIMEOUT, self.user_lookup.exists_by_id(user_id))
            .await
            .map_err(|_| ServiceError::BadRequest("invalid user".to_string()))?
            .map_err(|_| ServiceError::BadRequest("invalid user".to_string()))?;
        if !user_exists {
            return Err(ServiceError::BadRequest("invalid user".to_string()));
        }

        let existing = tokio::time::timeout(
            LOOKUP_TIMEOUT,
            self.ledger.get_transaction_by_external_id(&req.transaction_id),
        )
        .await
        .map_err(|_| ServiceError::Transient)?
        .map_err(ServiceError::from)?;
        if existing.is_some() {
            return Err(ServiceError::TransactionDuplicate);
        }

        let source_id = tokio::time::timeout(LOOKUP_TIMEOUT, self.source_lookup.exists_by_name(&req.source_name))
            .await
            .map_err(|_| ServiceError::BadRequest("invalid source".to_string()))?
            .map_err(|_| ServiceError::BadRequest("invalid source".to_string()))?
            .ok_or_else(|| ServiceError::BadRequest("invalid source".to_string()))?;

        let state = TransactionState::from_str(&req.state)
            .map_err(|_| ServiceError::BadRequest("invalid state".to_string()))?;

        let amount = normalize_amount(&req.amount)
            .ok_or_else(|| ServiceError::BadRequest("invalid amount".to_string()))?;

        let new_tx = NewTransaction {
            transaction_id: req.transaction_id,
            state,
            amount,
            source_id,
            user_id: user_id.to_string(),
        };

        self.ledger.post_transaction(new_tx).await.map_err(ServiceError::from)
    }
}

/// Parses a decimal-valued string, takes its absolute value, and rounds to
/// two fractional digits. Pure, so it's directly unit-testable (P4).
fn normalize_amount(raw: &str) -> Option<Decimal> {
    let parsed: Decimal = raw.trim().parse().ok()?;
    Some(parsed.abs().round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_negative_and_rounds() {
        assert_eq!(normalize_amount("-10.126").unwrap(), Decimal::new(1013, 2));
    }

    #[test]
    fn normalizes_plain_integer_string() {
        assert_eq!(normalize_amount("10").unwrap(), Decimal::new(1000, 2));
    }

    #[test]
    fn rejects_unparseable_amount() {
        assert!(normalize_amount("not-a-number").is_none());
    }

    #[test]
    fn rejects_unknown_state() {
        assert!(TransactionState::from_str("pending").is_err());
    }
}
