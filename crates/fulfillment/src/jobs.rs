//! Background job contract.
//!
//! The pipeline only needs fire-and-forget submission. Jobs are a closed set
//! of variants; whoever drains the queue handles them in one `match`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{AggregateId, ProductId};
use domain::CustomerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::services::{NotificationKind, PaymentReceipt, lock_state};
use crate::stage::PipelineStatus;

/// Deferred work produced by the pipeline and the low-stock monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Retry a notification that failed inline.
    Notification {
        customer_id: CustomerId,
        notification: NotificationKind,
        payload: serde_json::Value,
        attempt: u32,
    },
    /// Retry a payment reversal that failed during compensation.
    PaymentReconciliation {
        order_id: AggregateId,
        /// The capture to refund. `None` voids whatever an abandoned charge
        /// captured for the order.
        payment: Option<PaymentReceipt>,
        attempt: u32,
    },
    /// Record the outcome of a pipeline run.
    Audit {
        run_id: Uuid,
        order_id: Option<AggregateId>,
        status: PipelineStatus,
        summary: String,
    },
    /// A product dropped to or below its restock threshold.
    LowStockAlert {
        product_id: ProductId,
        available: u32,
        min_stock: u32,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Notification { .. } => "notification",
            Job::PaymentReconciliation { .. } => "payment_reconciliation",
            Job::Audit { .. } => "audit",
            Job::LowStockAlert { .. } => "low_stock_alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hands a job off without waiting for it to run.
    async fn submit(&self, job: Job) -> Result<(), JobError>;
}

fn record_submission(kind: &'static str, result: &Result<(), JobError>) {
    let outcome = if result.is_ok() { "accepted" } else { "rejected" };
    metrics::counter!("jobs_submitted_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Queue that keeps every submitted job, for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs submitted so far, in order.
    pub fn jobs(&self) -> Vec<Job> {
        lock_state(&self.jobs).clone()
    }

    /// Jobs of one kind.
    pub fn jobs_of_kind(&self, kind: &str) -> Vec<Job> {
        lock_state(&self.jobs)
            .iter()
            .filter(|job| job.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn submit(&self, job: Job) -> Result<(), JobError> {
        record_submission(job.kind(), &Ok(()));
        lock_state(&self.jobs).push(job);
        Ok(())
    }
}

/// Bounded queue backed by a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<Job>,
}

impl ChannelJobQueue {
    /// Creates the queue and the receiver a dispatcher drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn submit(&self, job: Job) -> Result<(), JobError> {
        let kind = job.kind();
        let result = self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => JobError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => JobError::QueueClosed,
        });
        record_submission(kind, &result);
        if let Err(err) = &result {
            tracing::warn!(kind, error = %err, "job submission rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(sku: &str) -> Job {
        Job::LowStockAlert {
            product_id: ProductId::new(sku),
            available: 1,
            min_stock: 5,
        }
    }

    #[tokio::test]
    async fn in_memory_queue_records_jobs() {
        let queue = InMemoryJobQueue::new();
        queue.submit(alert("A")).await.unwrap();
        queue
            .submit(Job::Audit {
                run_id: Uuid::new_v4(),
                order_id: None,
                status: PipelineStatus::Failed,
                summary: "failed".into(),
            })
            .await
            .unwrap();

        assert_eq!(queue.jobs().len(), 2);
        assert_eq!(queue.jobs_of_kind("audit").len(), 1);
    }

    #[tokio::test]
    async fn channel_queue_reports_full_and_closed() {
        let (queue, mut receiver) = ChannelJobQueue::new(1);
        queue.submit(alert("A")).await.unwrap();
        assert_eq!(queue.submit(alert("B")).await, Err(JobError::QueueFull));

        assert_eq!(receiver.recv().await, Some(alert("A")));
        drop(receiver);
        assert_eq!(queue.submit(alert("C")).await, Err(JobError::QueueClosed));
    }

    #[test]
    fn jobs_serialize_with_kind_tag() {
        let json = serde_json::to_value(alert("SKU-1")).unwrap();
        assert_eq!(json["kind"], "low_stock_alert");
        assert_eq!(json["product_id"], "SKU-1");
    }

    #[test]
    fn payment_reconciliation_keeps_receipt() {
        let job = Job::PaymentReconciliation {
            order_id: AggregateId::new(),
            payment: Some(PaymentReceipt {
                payment_id: "PAY-0001".into(),
                amount: common::Money::from_cents(2500),
            }),
            attempt: 1,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "payment_reconciliation");
        assert_eq!(json["payment"]["payment_id"], "PAY-0001");

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
