//! Best-effort customer notifications.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::CustomerId;
use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::error::ServiceError;

/// What the customer is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderShipped,
    OrderFailed,
    LowStock,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(
        &self,
        recipient: CustomerId,
        kind: NotificationKind,
        payload: &serde_json::Value,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct NotificationState {
    sent: Vec<(CustomerId, NotificationKind)>,
    fail_on_send: bool,
}

/// In-memory notification sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<Mutex<NotificationState>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        lock_state(&self.state).fail_on_send = fail;
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<(CustomerId, NotificationKind)> {
        lock_state(&self.state).sent.clone()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send(
        &self,
        recipient: CustomerId,
        kind: NotificationKind,
        _payload: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let mut state = lock_state(&self.state);
        if state.fail_on_send {
            return Err(ServiceError::Unavailable {
                service: "notification",
                reason: "mail relay unreachable".to_string(),
            });
        }
        state.sent.push((recipient, kind));
        Ok(())
    }
}
