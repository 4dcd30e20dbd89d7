//! Periodic low-stock scan.

use std::sync::Arc;
use std::time::Duration;

use common::CancellationToken;
use fulfillment::{Job, JobQueue};
use ledger::{LedgerError, LedgerStore, StockLedgerEntry};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Submits a [`Job::LowStockAlert`] once per interval for every entry at or
/// below either the global threshold or its own `min_stock`.
pub struct LowStockMonitor {
    ledger: Arc<dyn LedgerStore>,
    jobs: Arc<dyn JobQueue>,
    threshold: u32,
    interval: Duration,
}

impl LowStockMonitor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn JobQueue>,
        threshold: u32,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            jobs,
            threshold,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Scans once and returns how many alerts were submitted.
    pub async fn scan_once(&self) -> Result<usize, LedgerError> {
        let low = self.low_entries().await?;
        let mut submitted = 0;
        for entry in low {
            let job = Job::LowStockAlert {
                product_id: entry.product_id().clone(),
                available: entry.available(),
                min_stock: entry.thresholds().min_stock,
            };
            match self.jobs.submit(job).await {
                Ok(()) => submitted += 1,
                Err(err) => {
                    tracing::warn!(product_id = %entry.product_id(), error = %err, "low-stock alert dropped");
                }
            }
        }
        Ok(submitted)
    }

    /// Union of the global-threshold scan and the per-entry `min_stock` scan,
    /// ascending by available.
    async fn low_entries(&self) -> Result<Vec<StockLedgerEntry>, LedgerError> {
        let mut low = self.ledger.get_low_stock_items(self.threshold).await?;
        for entry in self.ledger.get_items_below_min_stock().await? {
            if !low.iter().any(|e| e.product_id() == entry.product_id()) {
                low.push(entry);
            }
        }
        low.sort_by(|a, b| {
            a.available()
                .cmp(&b.available())
                .then_with(|| a.product_id().cmp(b.product_id()))
        });
        Ok(low)
    }

    /// Scans every interval until `shutdown` fires. Scan errors are logged
    /// and the next tick tries again.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(threshold = self.threshold, interval_secs = self.interval.as_secs(), "low-stock monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            match self.scan_once().await {
                Ok(0) => {}
                Ok(alerts) => tracing::info!(alerts, "low-stock scan finished"),
                Err(err) => tracing::error!(error = %err, "low-stock scan failed"),
            }
        }
        tracing::info!("low-stock monitor stopped");
    }
}
