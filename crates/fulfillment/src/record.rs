//! The result of one fulfillment run.

use common::AggregateId;
use ledger::StockLine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureCategory, FulfillmentError};
use crate::services::{PaymentReceipt, Shipment};
use crate::stage::{PipelineStatus, Stage, StageOutcome};

/// Undo actions run when a pipeline fails before its commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationAction {
    CancelShipment,
    RefundPayment,
    /// Reverse a charge that was abandoned before it answered.
    VoidPayment,
    ReleaseInventory,
    CancelOrder,
}

impl CompensationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationAction::CancelShipment => "cancel_shipment",
            CompensationAction::RefundPayment => "refund_payment",
            CompensationAction::VoidPayment => "void_payment",
            CompensationAction::ReleaseInventory => "release_inventory",
            CompensationAction::CancelOrder => "cancel_order",
        }
    }
}

/// Outcome of one compensating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    pub action: CompensationAction,
    pub success: bool,
    pub error: Option<String>,
}

/// Everything a run did, in order, and how it ended.
#[derive(Debug)]
pub struct FulfillmentRecord {
    pub run_id: Uuid,
    pub status: PipelineStatus,
    pub stages: Vec<StageOutcome>,
    pub order_id: Option<AggregateId>,
    /// Lines still held in the ledger on behalf of this run. Cleared once
    /// they are fulfilled or released.
    pub reserved_items: Vec<StockLine>,
    pub payment: Option<PaymentReceipt>,
    /// Set while a charge is in flight. Still set after the run means the
    /// charge was abandoned and its outcome is unknown.
    pub charge_pending: bool,
    pub shipment: Option<Shipment>,
    /// Compensations in the order they ran.
    pub compensations: Vec<CompensationOutcome>,
    pub error: Option<FulfillmentError>,
}

impl FulfillmentRecord {
    pub(crate) fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: PipelineStatus::Pending,
            stages: Vec::new(),
            order_id: None,
            reserved_items: Vec::new(),
            payment: None,
            charge_pending: false,
            shipment: None,
            compensations: Vec::new(),
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Business-facing category of the failure, if the run failed.
    pub fn failure_category(&self) -> Option<FailureCategory> {
        self.error.as_ref().map(FulfillmentError::category)
    }

    /// The recorded outcome of `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Actions that were compensated, in execution order.
    pub fn compensation_actions(&self) -> Vec<CompensationAction> {
        self.compensations.iter().map(|c| c.action).collect()
    }

    /// One-line summary used for audit jobs and logs.
    pub fn summary(&self) -> String {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.stage.as_str()).collect();
        match &self.error {
            Some(err) => format!(
                "{} after [{}]: {} ({})",
                self.status,
                stages.join(", "),
                err,
                err.category()
            ),
            None => format!("{} after [{}]", self.status, stages.join(", ")),
        }
    }

    /// Splits the record into success or its error.
    pub fn into_result(mut self) -> Result<FulfillmentRecord, FulfillmentError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn summary_names_stages_and_category() {
        let mut record = FulfillmentRecord::new();
        record.status = PipelineStatus::Failed;
        record.stages.push(StageOutcome {
            stage: Stage::PlaceOrder,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            success: true,
            error: None,
            data: serde_json::Value::Null,
        });
        record.error = Some(FulfillmentError::InvalidRequest("no items".into()));

        let summary = record.summary();
        assert!(summary.starts_with("failed after [place_order]"));
        assert!(summary.contains("invalid_request"));
        assert_eq!(
            record.failure_category(),
            Some(FailureCategory::InvalidRequest)
        );
        assert!(record.into_result().is_err());
    }

    #[test]
    fn completed_record_converts_to_ok() {
        let mut record = FulfillmentRecord::new();
        record.status = PipelineStatus::Completed;
        assert!(record.is_completed());
        assert!(record.into_result().is_ok());
    }
}
