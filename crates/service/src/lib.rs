//! Service host for the inventory fulfillment engine.
//!
//! Loads [`Config`], sets up logging and Prometheus metrics, wires the
//! ledger, lock coordinator and fulfillment pipeline together, and runs the
//! background job dispatcher and low-stock monitor.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod telemetry;

use std::sync::Arc;

use common::CancellationToken;
use domain::InMemoryOrderStore;
use fulfillment::{
    ChannelJobQueue, Collaborators, FulfillmentPipeline, InMemoryNotificationService,
    InMemoryPaymentService, InMemoryProductCatalog, InMemoryShippingService, Job, JobQueue,
    LedgerInventoryService,
};
use ledger::{CachedLedgerStore, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use locking::{InMemoryLeaseStore, LeaseStore, LockCoordinator, PostgresLeaseStore};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use config::{Config, LogFormat};
pub use dispatcher::{JobDispatcher, JobOutcome};
pub use error::{Result, StartupError};
pub use monitor::LowStockMonitor;

/// The assembled engine.
///
/// External collaborators (catalog, payment, shipping, notifications) are the
/// in-memory implementations; a deployment swaps them for real clients.
pub struct Engine {
    pub pipeline: FulfillmentPipeline,
    pub ledger: Arc<dyn LedgerStore>,
    pub locks: LockCoordinator,
    pub orders: InMemoryOrderStore,
    pub catalog: InMemoryProductCatalog,
    pub payment: InMemoryPaymentService,
    pub notifications: InMemoryNotificationService,
    pub jobs: Arc<dyn JobQueue>,
    job_receiver: Option<mpsc::Receiver<Job>>,
    config: Config,
}

impl Engine {
    /// Builds every component from `config`.
    ///
    /// With `DATABASE_URL` set the ledger and leases live in PostgreSQL and
    /// migrations run first; otherwise everything is in memory.
    pub async fn build(config: Config) -> Result<Self> {
        let ledger: Arc<dyn LedgerStore>;
        let leases: Arc<dyn LeaseStore>;

        match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .connect(url)
                    .await?;
                let store = PostgresLedgerStore::new(pool.clone());
                store.run_migrations().await?;
                tracing::info!("using PostgreSQL ledger and lease stores");

                ledger = Arc::new(CachedLedgerStore::new(store, config.cache));
                leases = Arc::new(PostgresLeaseStore::new(pool));
            }
            None => {
                tracing::info!("DATABASE_URL not set, using in-memory stores");
                ledger = Arc::new(CachedLedgerStore::new(
                    InMemoryLedgerStore::new(),
                    config.cache,
                ));
                leases = Arc::new(InMemoryLeaseStore::new());
            }
        }
        Ok(Self::assemble(config, ledger, leases))
    }

    /// Wires the pipeline around already-built stores.
    pub fn assemble(
        config: Config,
        ledger: Arc<dyn LedgerStore>,
        leases: Arc<dyn LeaseStore>,
    ) -> Self {
        let locks = LockCoordinator::new(leases, config.lock);
        let inventory =
            LedgerInventoryService::new(Arc::clone(&ledger), locks.clone(), config.retry.clone());
        let (queue, job_receiver) = ChannelJobQueue::new(config.job_queue_capacity);
        let jobs: Arc<dyn JobQueue> = Arc::new(queue);

        let orders = InMemoryOrderStore::new();
        let catalog = InMemoryProductCatalog::new();
        let payment = InMemoryPaymentService::new();
        let notifications = InMemoryNotificationService::new();

        let pipeline = FulfillmentPipeline::new(
            Collaborators {
                orders: Arc::new(orders.clone()),
                catalog: Arc::new(catalog.clone()),
                inventory: Arc::new(inventory),
                payment: Arc::new(payment.clone()),
                shipping: Arc::new(InMemoryShippingService::new()),
                notifications: Arc::new(notifications.clone()),
                jobs: Arc::clone(&jobs),
            },
            config.pipeline,
        );

        Self {
            pipeline,
            ledger,
            locks,
            orders,
            catalog,
            payment,
            notifications,
            jobs,
            job_receiver: Some(job_receiver),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the job dispatcher and the low-stock monitor. Both stop when
    /// `shutdown` fires. Calling this twice only starts the monitor again.
    pub fn start_background(&mut self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(2);

        if let Some(receiver) = self.job_receiver.take() {
            let dispatcher = JobDispatcher::new(
                Arc::new(self.notifications.clone()),
                Arc::new(self.payment.clone()),
                Arc::clone(&self.jobs),
            );
            tasks.push(tokio::spawn(dispatcher.run(receiver, shutdown.clone())));
        }

        let monitor = LowStockMonitor::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.jobs),
            self.config.low_stock_threshold,
            self.config.low_stock_interval,
        );
        tasks.push(tokio::spawn(monitor.run(shutdown.clone())));
        tasks
    }
}
