//! Pipeline stages and run status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed, ordered set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PlaceOrder,
    ReserveInventory,
    ProcessPayment,
    FulfillOrder,
    DispatchNotification,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::PlaceOrder,
        Stage::ReserveInventory,
        Stage::ProcessPayment,
        Stage::FulfillOrder,
        Stage::DispatchNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PlaceOrder => "place_order",
            Stage::ReserveInventory => "reserve_inventory",
            Stage::ProcessPayment => "process_payment",
            Stage::FulfillOrder => "fulfill_order",
            Stage::DispatchNotification => "dispatch_notification",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one pipeline run.
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> Failed
///                       -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Processing => "processing",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened in one stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    /// Stage-specific details (order id, payment id, reserved lines).
    pub data: serde_json::Value,
}
