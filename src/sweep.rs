//! The Cancel Sweep: a single long-lived task that periodically reverses
//! odd-ranked recently-processed transactions. One task, no shared mutable
//! counter — the teacher's source used a mutex to guard a handler against
//! re-entrant ticks; here structural sequencing (one task awaiting each
//! sweep to completion before the next tick) makes that lock unnecessary.

use std::time::Duration;

use tokio::sync::watch;

use crate::ledger::LedgerStore;

const SWEEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CancelSweep {
    ledger: LedgerStore,
    interval: Duration,
}

impl CancelSweep {
    pub fn new(ledger: LedgerStore, interval_minutes: u64) -> Self {
        Self {
            ledger,
            interval: Duration::from_secs(interval_minutes.max(1) * 60),
        }
    }

    /// Runs until `shutdown` reports `true`. Intended to be spawned as its
    /// own task and raced against the HTTP server in `main`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so the sweep waits a
        // full interval before its first pass.
        ticker.tick().await;

        let mut iteration: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    iteration += 1;
                    self.run_once(iteration).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("cancel sweep received shutdown signal, stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_once(&self, iteration: u64) {
        tracing::debug!(iteration, "cancel sweep starting");

        match tokio::time::timeout(SWEEP_TIMEOUT, self.ledger.cancel_odd_recent()).await {
            Ok(Ok(cancelled)) => {
                tracing::info!(iteration, cancelled = cancelled.len(), "cancel sweep completed");
            }
            Ok(Err(err)) => {
                tracing::error!(iteration, error = %err, "cancel sweep failed");
            }
            Err(_) => {
                tracing::error!(iteration, "cancel sweep timed out");
            }
        }
    }
}
