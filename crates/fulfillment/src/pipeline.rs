//! The order fulfillment pipeline.
//!
//! Five stages run strictly in order:
//!
//! 1. place the order (validate, price from the catalog, store as `pending`)
//! 2. reserve inventory, one concurrent reservation per line
//! 3. charge the payment
//! 4. book the shipment and turn reservations into permanent decrements
//! 5. notify the customer (best effort)
//!
//! Stage 4 is the commit point. A failure or interruption before it undoes
//! whatever the earlier stages did, newest first: cancel the shipment, refund
//! the payment, release the reserved lines, cancel the order. A charge that
//! was abandoned mid-flight is voided in place of the refund. Compensation
//! failures are logged and recorded but never replace the original error; a
//! payment that could not be reversed is handed to the job queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{CancelReason, CancellationToken};
use domain::{CustomerId, Order, OrderItem, OrderStatus, OrderStore, PaymentMethod};
use futures_util::future::join_all;
use ledger::StockLine;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{FailureCategory, FulfillmentError, Result};
use crate::jobs::{Job, JobQueue};
use crate::record::{CompensationAction, CompensationOutcome, FulfillmentRecord};
use crate::services::{
    InventoryService, NotificationKind, NotificationService, PaymentReceipt, PaymentService,
    ProductCatalog, Shipment, ShippingService,
};
use crate::stage::{PipelineStatus, Stage, StageOutcome};

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Deadline for a whole run, measured from the start of the first stage.
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// A customer's request to buy some products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub customer_id: CustomerId,
    pub items: Vec<StockLine>,
    pub payment_method: PaymentMethod,
}

impl FulfillmentRequest {
    pub fn new(
        customer_id: CustomerId,
        items: Vec<StockLine>,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            customer_id,
            items,
            payment_method,
        }
    }
}

/// Everything the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
    pub notifications: Arc<dyn NotificationService>,
    pub jobs: Arc<dyn JobQueue>,
}

/// Runs fulfillment requests through the stage sequence.
///
/// Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct FulfillmentPipeline {
    services: Arc<Collaborators>,
    config: PipelineConfig,
}

impl FulfillmentPipeline {
    pub fn new(services: Collaborators, config: PipelineConfig) -> Self {
        Self {
            services: Arc::new(services),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs a request to completion and returns its record.
    ///
    /// `cancel` lets the caller abandon the run; the configured timeout
    /// applies on top of it. Either one interrupts the current wait (lock,
    /// retry backoff or payment charge) or stops the run before its next
    /// stage, and triggers compensation.
    #[tracing::instrument(
        skip_all,
        fields(customer_id = %request.customer_id, lines = request.items.len())
    )]
    pub async fn execute(
        &self,
        request: FulfillmentRequest,
        cancel: &CancellationToken,
    ) -> FulfillmentRecord {
        metrics::counter!("pipeline_executions_total").increment(1);
        let run_start = std::time::Instant::now();

        let run_cancel = CancellationToken::new();
        let _deadline = Deadline::arm(cancel, &run_cancel, self.config.timeout);

        let mut record = FulfillmentRecord::new();
        record.status = PipelineStatus::Processing;
        tracing::info!(run_id = %record.run_id, "fulfillment started");

        match self.run_stages(&mut record, &request, &run_cancel).await {
            Ok(()) => {
                record.status = PipelineStatus::Completed;
                metrics::counter!("pipeline_completed_total").increment(1);
                tracing::info!(run_id = %record.run_id, order_id = ?record.order_id, "fulfillment completed");
            }
            Err(err) => {
                let category = err.category();
                tracing::warn!(
                    run_id = %record.run_id,
                    error = %err,
                    %category,
                    "fulfillment failed, compensating"
                );
                self.compensate(&mut record).await;
                record.status = match category {
                    FailureCategory::Cancelled => PipelineStatus::Cancelled,
                    _ => PipelineStatus::Failed,
                };
                metrics::counter!("pipeline_failed_total", "category" => category.as_str())
                    .increment(1);
                record.error = Some(err);
            }
        }

        metrics::histogram!("pipeline_duration_seconds").record(run_start.elapsed().as_secs_f64());
        self.submit_audit(&record).await;
        record
    }

    /// Starts a request on its own task and returns immediately.
    pub fn spawn(&self, request: FulfillmentRequest) -> FulfillmentHandle {
        let cancel = CancellationToken::new();
        let pipeline = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { pipeline.execute(request, &token).await });
        FulfillmentHandle { cancel, task }
    }

    async fn run_stages(
        &self,
        record: &mut FulfillmentRecord,
        request: &FulfillmentRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started_at = begin(Stage::PlaceOrder, cancel)?;
        let placed = self.place_order(request).await;
        let order = finish(record, Stage::PlaceOrder, started_at, placed, |order| {
            serde_json::json!({
                "order_id": order.id(),
                "total_cents": order.total_amount().cents(),
                "lines": order.items().len(),
            })
        })?;
        record.order_id = Some(order.id());

        let lines: Vec<StockLine> = order
            .items()
            .iter()
            .map(|item| StockLine::new(item.product_id.clone(), item.quantity))
            .collect();

        let started_at = begin(Stage::ReserveInventory, cancel)?;
        let reserved = self.reserve_inventory(record, &order, &lines, cancel).await;
        finish(record, Stage::ReserveInventory, started_at, reserved, |_| {
            serde_json::json!({ "reserved": lines })
        })?;

        let started_at = begin(Stage::ProcessPayment, cancel)?;
        let paid = self
            .process_payment(record, &order, &request.payment_method, cancel)
            .await;
        finish(record, Stage::ProcessPayment, started_at, paid, |receipt| {
            serde_json::json!({
                "payment_id": receipt.payment_id,
                "amount_cents": receipt.amount.cents(),
            })
        })?;

        let started_at = begin(Stage::FulfillOrder, cancel)?;
        let shipped = self.fulfill_order(record, &order, &lines, cancel).await;
        finish(record, Stage::FulfillOrder, started_at, shipped, |shipment| {
            serde_json::json!({
                "shipment_id": shipment.shipment_id,
                "tracking_number": shipment.tracking_number,
            })
        })?;

        self.dispatch_notification(record, &order, cancel).await;
        Ok(())
    }

    async fn place_order(&self, request: &FulfillmentRequest) -> Result<Order> {
        if request.items.is_empty() {
            return Err(FulfillmentError::InvalidRequest(
                "order has no items".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            if line.quantity == 0 {
                return Err(FulfillmentError::InvalidRequest(format!(
                    "quantity for {} must be positive",
                    line.product_id
                )));
            }

            let product = self
                .services
                .catalog
                .lookup(&line.product_id)
                .await
                .map_err(|source| FulfillmentError::Catalog {
                    product_id: line.product_id.clone(),
                    source,
                })?
                .ok_or_else(|| FulfillmentError::UnknownProduct(line.product_id.clone()))?;

            if !product.active {
                return Err(FulfillmentError::InactiveProduct(product.product_id));
            }

            items.push(OrderItem::new(
                product.product_id,
                product.name,
                line.quantity,
                product.unit_price,
            ));
        }

        let order = Order::place(request.customer_id, items)?;
        Ok(self.services.orders.create(order).await?)
    }

    async fn reserve_inventory(
        &self,
        record: &mut FulfillmentRecord,
        order: &Order,
        lines: &[StockLine],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let inventory = &self.services.inventory;
        let results = join_all(
            lines
                .iter()
                .map(|line| async move { (line, inventory.reserve(line, cancel).await) }),
        )
        .await;

        // Successful lines are kept on the record so compensation releases
        // them even when a sibling line failed.
        let mut failure = None;
        for (line, result) in results {
            match result {
                Ok(_) => record.reserved_items.push(line.clone()),
                Err(source) if failure.is_none() => {
                    failure = Some(FulfillmentError::Inventory {
                        operation: "reserve",
                        product_id: line.product_id.clone(),
                        source,
                    });
                }
                Err(source) => {
                    tracing::debug!(product_id = %line.product_id, error = %source, "additional reservation failure");
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        self.services
            .orders
            .update_status(order.id(), OrderStatus::Confirmed)
            .await?;
        Ok(())
    }

    async fn process_payment(
        &self,
        record: &mut FulfillmentRecord,
        order: &Order,
        method: &PaymentMethod,
        cancel: &CancellationToken,
    ) -> Result<PaymentReceipt> {
        record.charge_pending = true;
        let charge = self
            .services
            .payment
            .charge(order.id(), order.total_amount(), method);

        // An abandoned charge leaves `charge_pending` set for compensation.
        let answer = tokio::select! {
            answer = charge => answer,
            reason = cancel.cancelled() => {
                tracing::warn!(order_id = %order.id(), %reason, "payment charge abandoned");
                return Err(FulfillmentError::interrupted(Stage::ProcessPayment, reason));
            }
        };
        record.charge_pending = false;

        let receipt = answer.map_err(FulfillmentError::Payment)?;
        record.payment = Some(receipt.clone());

        self.services
            .orders
            .update_status(order.id(), OrderStatus::Paid)
            .await?;
        Ok(receipt)
    }

    async fn fulfill_order(
        &self,
        record: &mut FulfillmentRecord,
        order: &Order,
        lines: &[StockLine],
        cancel: &CancellationToken,
    ) -> Result<Shipment> {
        let shipment = self
            .services
            .shipping
            .create_shipment(order.id(), order.customer_id(), lines)
            .await
            .map_err(FulfillmentError::Shipping)?;
        record.shipment = Some(shipment.clone());

        self.services
            .inventory
            .fulfill_all(lines, cancel)
            .await
            .map_err(FulfillmentError::Commit)?;
        record.reserved_items.clear();

        // Stock is committed; from here on the run cannot be rolled back.
        if let Err(err) = self
            .services
            .orders
            .update_status(order.id(), OrderStatus::Shipped)
            .await
        {
            tracing::error!(order_id = %order.id(), error = %err, "order shipped but status update failed");
        }
        Ok(shipment)
    }

    /// Best effort. A failed or interrupted send is handed to the job queue
    /// instead of failing the run.
    async fn dispatch_notification(
        &self,
        record: &mut FulfillmentRecord,
        order: &Order,
        cancel: &CancellationToken,
    ) {
        let stage = Stage::DispatchNotification;
        let started_at = Utc::now();
        let payload = serde_json::json!({
            "order_id": order.id(),
            "tracking_number": record.shipment.as_ref().map(|s| s.tracking_number.clone()),
        });

        let result = match cancel.reason() {
            Some(reason) => Err(FulfillmentError::interrupted(stage, reason)),
            None => self
                .services
                .notifications
                .send(order.customer_id(), NotificationKind::OrderShipped, &payload)
                .await
                .map_err(FulfillmentError::Notification),
        };

        let error = match result {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(error = %err, "notification deferred to job queue");
                let job = Job::Notification {
                    customer_id: order.customer_id(),
                    notification: NotificationKind::OrderShipped,
                    payload: payload.clone(),
                    attempt: 1,
                };
                if let Err(submit_err) = self.services.jobs.submit(job).await {
                    tracing::error!(error = %submit_err, "failed to defer notification");
                }
                Some(err.to_string())
            }
        };

        record.stages.push(StageOutcome {
            stage,
            started_at,
            finished_at: Utc::now(),
            success: error.is_none(),
            error,
            data: payload,
        });
    }

    /// Undoes completed work, newest first. Each action runs at most once.
    async fn compensate(&self, record: &mut FulfillmentRecord) {
        // The run's own token may already be cancelled; cleanup gets a fresh one.
        let cleanup = CancellationToken::new();

        if let Some(shipment) = record.shipment.take() {
            let result = self
                .services
                .shipping
                .cancel_shipment(&shipment.shipment_id)
                .await
                .map_err(|e| e.to_string());
            if result.is_err() {
                record.shipment = Some(shipment);
            }
            push_compensation(record, CompensationAction::CancelShipment, result);
        }

        if let Some(payment) = record.payment.clone() {
            let result = self
                .services
                .payment
                .refund(&payment.payment_id, payment.amount)
                .await
                .map_err(|e| e.to_string());
            if result.is_err() {
                self.defer_payment_reversal(record, Some(payment)).await;
            }
            push_compensation(record, CompensationAction::RefundPayment, result);
        } else if record.charge_pending
            && let Some(order_id) = record.order_id
        {
            let result = match self.services.payment.void_charge(order_id).await {
                Ok(voided) => {
                    tracing::info!(%order_id, voided, "abandoned charge voided");
                    record.charge_pending = false;
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            };
            if result.is_err() {
                self.defer_payment_reversal(record, None).await;
            }
            push_compensation(record, CompensationAction::VoidPayment, result);
        }

        if !record.reserved_items.is_empty() {
            let mut still_reserved = Vec::new();
            let mut errors = Vec::new();
            for line in std::mem::take(&mut record.reserved_items) {
                if let Err(err) = self.services.inventory.release(&line, &cleanup).await {
                    errors.push(format!("{}: {err}", line.product_id));
                    still_reserved.push(line);
                }
            }
            record.reserved_items = still_reserved;
            let result = if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join("; "))
            };
            push_compensation(record, CompensationAction::ReleaseInventory, result);
        }

        if let Some(order_id) = record.order_id {
            let result = self
                .services
                .orders
                .update_status(order_id, OrderStatus::Cancelled)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            push_compensation(record, CompensationAction::CancelOrder, result);
        }
    }

    /// Queues a reversal that failed inline so it is retried in the background.
    async fn defer_payment_reversal(
        &self,
        record: &FulfillmentRecord,
        payment: Option<PaymentReceipt>,
    ) {
        let Some(order_id) = record.order_id else {
            return;
        };
        let job = Job::PaymentReconciliation {
            order_id,
            payment,
            attempt: 1,
        };
        if let Err(err) = self.services.jobs.submit(job).await {
            tracing::error!(%order_id, error = %err, "failed to defer payment reversal");
        }
    }

    async fn submit_audit(&self, record: &FulfillmentRecord) {
        let job = Job::Audit {
            run_id: record.run_id,
            order_id: record.order_id,
            status: record.status,
            summary: record.summary(),
        };
        if let Err(err) = self.services.jobs.submit(job).await {
            tracing::warn!(run_id = %record.run_id, error = %err, "failed to submit audit job");
        }
    }
}

/// Checks the run token and logs the start of a stage.
fn begin(stage: Stage, cancel: &CancellationToken) -> Result<DateTime<Utc>> {
    if let Some(reason) = cancel.reason() {
        return Err(FulfillmentError::interrupted(stage, reason));
    }
    tracing::info!(%stage, "pipeline stage started");
    Ok(Utc::now())
}

/// Records a stage's outcome and passes its result through.
fn finish<T>(
    record: &mut FulfillmentRecord,
    stage: Stage,
    started_at: DateTime<Utc>,
    result: Result<T>,
    data: impl FnOnce(&T) -> serde_json::Value,
) -> Result<T> {
    let (success, error, data) = match &result {
        Ok(value) => (true, None, data(value)),
        Err(err) => {
            tracing::warn!(%stage, error = %err, "pipeline stage failed");
            (false, Some(err.to_string()), serde_json::Value::Null)
        }
    };
    record.stages.push(StageOutcome {
        stage,
        started_at,
        finished_at: Utc::now(),
        success,
        error,
        data,
    });
    result
}

fn push_compensation(
    record: &mut FulfillmentRecord,
    action: CompensationAction,
    result: std::result::Result<(), String>,
) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    metrics::counter!(
        "pipeline_compensations_total",
        "action" => action.as_str(),
        "outcome" => outcome
    )
    .increment(1);

    if let Err(err) = &result {
        tracing::error!(action = action.as_str(), error = %err, "compensation failed");
    }
    record.compensations.push(CompensationOutcome {
        action,
        success: result.is_ok(),
        error: result.err(),
    });
}

/// Forwards caller cancellation and the run deadline into the run token.
/// Dropping it stops the watcher.
struct Deadline(JoinHandle<()>);

impl Deadline {
    fn arm(caller: &CancellationToken, run: &CancellationToken, timeout: Duration) -> Self {
        if let Some(reason) = caller.reason() {
            run.cancel_with(reason);
        }
        let caller = caller.clone();
        let run = run.clone();
        Self(tokio::spawn(async move {
            let reason = tokio::select! {
                reason = caller.cancelled() => reason,
                () = tokio::time::sleep(timeout) => CancelReason::DeadlineExceeded,
            };
            tracing::debug!(%reason, "fulfillment run interrupted");
            run.cancel_with(reason);
        }))
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to a run started with [`FulfillmentPipeline::spawn`].
pub struct FulfillmentHandle {
    cancel: CancellationToken,
    task: JoinHandle<FulfillmentRecord>,
}

impl FulfillmentHandle {
    /// Asks the run to stop. It compensates and finishes as `Cancelled`
    /// unless it already passed its commit point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run's record.
    pub async fn wait(self) -> Result<FulfillmentRecord> {
        self.task
            .await
            .map_err(|e| FulfillmentError::TaskFailed(e.to_string()))
    }
}
