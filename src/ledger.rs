//! The Ledger Store: the four serializable operations that own every
//! mutation of `users` and `transactions`. Everything above this module
//! reads through [`LedgerStore`]'s read operations; nothing else writes.

use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use sqlx::{Executor, PgPool, Row};

use crate::error::{is_retryable, LedgerError};
use crate::models::{CancelledTransaction, NewTransaction, PostedTransaction, StoredTransaction, TransactionState};

/// Retry budget for serialization conflicts. Capped, not unbounded — see
/// the design notes on why the source's unbounded loop isn't reproduced here.
const MAX_RETRY_ATTEMPTS: u32 = 8;
const BASE_RETRY_DELAY_MS: u64 = 10;

/// How many of the most recently processed transactions the cancel sweep
/// considers on each pass.
const CANCEL_SWEEP_BATCH_SIZE: i64 = 20;

enum RetryDecision {
    Retry,
    Exhausted,
    Fatal,
}

fn classify(attempt: u32, err: &sqlx::Error) -> RetryDecision {
    if is_retryable(err) {
        if attempt < MAX_RETRY_ATTEMPTS {
            RetryDecision::Retry
        } else {
            RetryDecision::Exhausted
        }
    } else {
        RetryDecision::Fatal
    }
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    let jitter = rand::thread_rng().gen_range(0..10);
    BASE_RETRY_DELAY_MS * (1u64 << (attempt.saturating_sub(1))) + jitter
}

/// Runs `body` inside a fresh `SERIALIZABLE` transaction, retrying the whole
/// thing on a serialization or deadlock conflict (SQLSTATE `40001`/`40P01`)
/// with exponential backoff plus jitter. `body` receives the open
/// transaction and returns a plain `sqlx::Result`; this macro is the only
/// place that decides retry vs. give-up, following the teacher's
/// `with_serializable_tx!` macro, generalized to one shared policy.
macro_rules! with_serializable_retry {
    ($pool:expr, $tx:ident, $body:block) => {{
        let mut attempt: u32 = 1;
        loop {
            let mut $tx = $pool.begin().await.map_err(LedgerError::from)?;

            if let Err(err) = $tx
                .execute(sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"))
                .await
            {
                $tx.rollback().await.ok();
                break Err(LedgerError::from(err));
            }

            let body_result: Result<_, sqlx::Error> = async { $body }.await;

            let outcome = match body_result {
                Ok(value) => match $tx.commit().await {
                    Ok(()) => Ok(value),
                    Err(err) => Err(err),
                },
                Err(err) => {
                    $tx.rollback().await.ok();
                    Err(err)
                }
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(err) => match classify(attempt, &err) {
                    RetryDecision::Retry => {
                        let delay = backoff_delay_ms(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    RetryDecision::Exhausted => break Err(LedgerError::Transient),
                    RetryDecision::Fatal => break Err(LedgerError::from(err)),
                },
            }
        }
    }};
}

/// Persistent, serializable access to the wallet ledger. Cheap to clone —
/// wraps a `PgPool`, which is itself an `Arc` internally.
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts one transaction row and, if it would not drive the owning
    /// user's balance negative, applies its delta to that balance. Both
    /// happen as one statement so the decision window visible to a racing
    /// transaction is minimal.
    pub async fn post_transaction(&self, tx: NewTransaction) -> Result<PostedTransaction, LedgerError> {
        let pool = &self.pool;

        with_serializable_retry!(pool, db_tx, {
            let delta = tx.state.signed(tx.amount);

            let row = sqlx::query(
                r#"
                WITH current_user AS (
                    SELECT balance FROM users WHERE id = $4 FOR UPDATE
                ),
                decision AS (
                    SELECT
                        (SELECT balance FROM current_user) + $6::numeric >= 0 AS should_apply
                ),
                inserted AS (
                    INSERT INTO transactions (transaction_id, state, amount, source_id, user_id, processed)
                    SELECT $1, $2, $3, $5, $4, (SELECT should_apply FROM decision)
                    RETURNING transaction_id, user_id, processed
                ),
                updated AS (
                    UPDATE users
                    SET balance = balance + $6::numeric
                    WHERE id = $4 AND (SELECT should_apply FROM decision)
                    RETURNING balance
                )
                SELECT
                    i.transaction_id,
                    i.user_id,
                    i.processed,
                    COALESCE(
                        (SELECT balance FROM updated),
                        (SELECT balance FROM current_user)
                    ) AS balance_after
                FROM inserted i
                "#,
            )
            .bind(&tx.transaction_id)
            .bind(tx.state.as_str())
            .bind(tx.amount)
            .bind(&tx.user_id)
            .bind(tx.source_id)
            .bind(delta)
            .fetch_one(&mut *db_tx)
            .await?;

            Ok(PostedTransaction {
                user_id: row.get("user_id"),
                balance_after: row.get("balance_after"),
                transaction_id: row.get("transaction_id"),
                processed: row.get("processed"),
            })
        })
    }

    /// Reverses a subset of the 20 most-recently-processed transactions,
    /// never driving any user's balance negative. See the module-level
    /// design notes for the exact selection rule.
    pub async fn cancel_odd_recent(&self) -> Result<Vec<CancelledTransaction>, LedgerError> {
        let pool = &self.pool;

        with_serializable_retry!(pool, db_tx, {
            let rows = sqlx::query(
                r#"
                WITH candidates AS (
                    SELECT id, transaction_id, state, amount, user_id, created_at,
                           DENSE_RANK() OVER (ORDER BY created_at DESC, id DESC) AS rnk
                    FROM transactions
                    WHERE processed = true
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                ),
                odd AS (
                    SELECT * FROM candidates WHERE rnk % 2 = 1
                ),
                reversal AS (
                    SELECT
                        o.id, o.transaction_id, o.state, o.amount, o.user_id, o.created_at,
                        CASE WHEN o.state = 'win' THEN -o.amount ELSE o.amount END AS reversal_delta
                    FROM odd o
                ),
                running AS (
                    SELECT
                        r.*,
                        SUM(r.reversal_delta) OVER (
                            PARTITION BY r.user_id
                            ORDER BY r.created_at DESC, r.id DESC
                            ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                        ) AS running_sum
                    FROM reversal r
                ),
                kept AS (
                    SELECT running.*
                    FROM running
                    JOIN users u ON u.id = running.user_id
                    WHERE u.balance + running.running_sum >= 0
                ),
                updated_txns AS (
                    UPDATE transactions t
                    SET processed = false
                    FROM kept k
                    WHERE t.id = k.id
                    RETURNING t.id
                ),
                user_deltas AS (
                    SELECT user_id, SUM(reversal_delta) AS total_delta
                    FROM kept
                    GROUP BY user_id
                ),
                updated_users AS (
                    UPDATE users u
                    SET balance = u.balance + ud.total_delta
                    FROM user_deltas ud
                    WHERE u.id = ud.user_id
                    RETURNING u.id AS user_id, u.balance AS balance_after
                )
                SELECT k.user_id, k.transaction_id, k.state, k.amount, uu.balance_after
                FROM kept k
                JOIN updated_users uu ON uu.user_id = k.user_id
                ORDER BY k.created_at DESC, k.id DESC
                "#,
            )
            .bind(CANCEL_SWEEP_BATCH_SIZE)
            .fetch_all(&mut *db_tx)
            .await?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let state_str: String = row.get("state");
                let state: TransactionState = state_str.parse().map_err(|_| {
                    sqlx::Error::Decode(
                        format!("unexpected transaction state {state_str:?} in cancel_odd_recent").into(),
                    )
                })?;
                out.push(CancelledTransaction {
                    user_id: row.get("user_id"),
                    balance_after: row.get("balance_after"),
                    transaction_id: row.get("transaction_id"),
                    state,
                    amount: row.get("amount"),
                });
            }

            Ok(out)
        })
    }

    /// No explicit transaction: a single row read is already atomic.
    pub async fn get_user_balance(&self, user_id: &str) -> Result<Decimal, LedgerError> {
        let row = sqlx::query("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("balance"))
    }

    pub async fn get_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredTransaction>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, transaction_id, state, amount, source_id, user_id, processed, created_at \
             FROM transactions WHERE transaction_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_str: String = row.get("state");
        let state: TransactionState = state_str.parse().map_err(|_| {
            LedgerError::Internal(anyhow::anyhow!(
                "unexpected transaction state {state_str:?} for transaction_id {external_id:?}"
            ))
        })?;

        Ok(Some(StoredTransaction {
            id: row.get("id"),
            transaction_id: row.get("transaction_id"),
            state,
            amount: row.get("amount"),
            source_id: row.get("source_id"),
            user_id: row.get("user_id"),
            processed: row.get("processed"),
            created_at: row.get("created_at"),
        }))
    }
}

/// Pure helper extracted for unit testing: given a flat list of candidates
/// in rank order (rank 1 first) with each candidate's reversal delta and
/// the owning user's starting balance, returns the indices that are kept.
/// Mirrors the SQL `running`/`kept` CTEs above exactly, so the SQL's
/// behavior can be checked without a database.
#[cfg(test)]
pub(crate) fn select_keepable(starting_balance: Decimal, reversal_deltas: &[Decimal]) -> Vec<bool> {
    let mut running = Decimal::ZERO;
    let mut keep = Vec::with_capacity(reversal_deltas.len());
    for delta in reversal_deltas {
        running += *delta;
        keep.push(starting_balance + running >= Decimal::ZERO);
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(n: i64) -> Decimal {
        Decimal::new(n * 100, 2)
    }

    #[test]
    fn odd_rank_sweep_keeps_first_two_of_three_drops_third() {
        // Six wins of 50 each; ranks 1, 3, 5 selected; balance 100.
        let deltas = [d(-50), d(-50), d(-50)];
        let keep = select_keepable(d(100), &deltas);
        assert_eq!(keep, vec![true, true, false]);
    }

    #[test]
    fn empty_candidate_list_keeps_nothing() {
        let keep = select_keepable(d(100), &[]);
        assert!(keep.is_empty());
    }

    #[test]
    fn never_negative_even_for_single_oversized_reversal() {
        let keep = select_keepable(d(10), &[d(-50)]);
        assert_eq!(keep, vec![false]);
    }
}
