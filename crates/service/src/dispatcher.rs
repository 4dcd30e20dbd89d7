//! Background job execution.

use std::sync::Arc;
use std::time::Duration;

use common::{CancellationToken, RetryPolicy};
use fulfillment::{Job, JobQueue, NotificationService, PaymentService, ServiceError};
use tokio::sync::mpsc;

/// What happened to a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Failed and goes back on the queue once its backoff elapses.
    Requeued,
    /// Failed and will not be tried again.
    Dropped,
}

impl JobOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Done => "done",
            JobOutcome::Requeued => "requeued",
            JobOutcome::Dropped => "dropped",
        }
    }
}

/// Drains the job channel and runs every job kind.
///
/// Notifications and payment reversals that fail are resubmitted after an
/// exponential backoff until `max_attempts` is reached. Retries still waiting
/// when the dispatcher stops are dropped.
pub struct JobDispatcher {
    notifications: Arc<dyn NotificationService>,
    payment: Arc<dyn PaymentService>,
    queue: Arc<dyn JobQueue>,
    max_attempts: u32,
    backoff: RetryPolicy,
    scheduled: CancellationToken,
}

impl JobDispatcher {
    /// `queue` is where failed jobs are resubmitted.
    pub fn new(
        notifications: Arc<dyn NotificationService>,
        payment: Arc<dyn PaymentService>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            notifications,
            payment,
            queue,
            max_attempts: 3,
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(60))
                .build(),
            scheduled: CancellationToken::new(),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay schedule between attempts of a failed job.
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs jobs until the channel closes or `shutdown` fires.
    pub async fn run(self, mut receiver: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        tracing::info!("job dispatcher started");
        loop {
            let job = tokio::select! {
                job = receiver.recv() => job,
                _ = shutdown.cancelled() => None,
            };
            let Some(job) = job else { break };
            self.dispatch(job).await;
        }
        self.scheduled.cancel();
        tracing::info!("job dispatcher stopped");
    }

    /// Runs a single job.
    #[tracing::instrument(skip_all, fields(kind = job.kind()))]
    pub async fn dispatch(&self, job: Job) -> JobOutcome {
        let kind = job.kind();
        let outcome = match job {
            Job::Notification {
                customer_id,
                notification,
                payload,
                attempt,
            } => match self
                .notifications
                .send(customer_id, notification, &payload)
                .await
            {
                Ok(()) => JobOutcome::Done,
                Err(err) => {
                    let next = Job::Notification {
                        customer_id,
                        notification,
                        payload,
                        attempt: attempt + 1,
                    };
                    self.retry_later(next, attempt, &err)
                }
            },
            Job::PaymentReconciliation {
                order_id,
                payment,
                attempt,
            } => {
                let reversed = match &payment {
                    Some(receipt) => {
                        self.payment
                            .refund(&receipt.payment_id, receipt.amount)
                            .await
                    }
                    None => self.payment.void_charge(order_id).await.map(|_| ()),
                };
                match reversed {
                    Ok(()) => {
                        tracing::info!(%order_id, attempt, "payment reversed");
                        JobOutcome::Done
                    }
                    Err(err) => {
                        let next = Job::PaymentReconciliation {
                            order_id,
                            payment,
                            attempt: attempt + 1,
                        };
                        self.retry_later(next, attempt, &err)
                    }
                }
            }
            Job::Audit {
                run_id,
                order_id,
                status,
                summary,
            } => {
                tracing::info!(
                    target: "audit",
                    %run_id,
                    order_id = ?order_id,
                    %status,
                    %summary,
                    "fulfillment run recorded"
                );
                JobOutcome::Done
            }
            Job::LowStockAlert {
                product_id,
                available,
                min_stock,
            } => {
                tracing::warn!(%product_id, available, min_stock, "low stock");
                metrics::counter!("low_stock_alerts_total").increment(1);
                JobOutcome::Done
            }
        };

        metrics::counter!("jobs_processed_total", "kind" => kind, "outcome" => outcome.as_str())
            .increment(1);
        outcome
    }

    /// Schedules `next` after the backoff for the attempt that just failed.
    fn retry_later(&self, next: Job, attempt: u32, error: &ServiceError) -> JobOutcome {
        if attempt >= self.max_attempts {
            tracing::error!(attempt, %error, "job abandoned");
            return JobOutcome::Dropped;
        }

        let delay = self.backoff.delay_for_attempt(attempt);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            %error,
            "job failed, retrying later"
        );

        let queue = Arc::clone(&self.queue);
        let scheduled = self.scheduled.clone();
        tokio::spawn(async move {
            let kind = next.kind();
            if scheduled.sleep(delay).await.is_some() {
                tracing::warn!(kind, "dispatcher stopped, scheduled retry dropped");
                return;
            }
            if let Err(err) = queue.submit(next).await {
                tracing::error!(kind, error = %err, "could not requeue job");
            }
        });
        JobOutcome::Requeued
    }
}
