//! Payment collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, Money};
use domain::PaymentMethod;
use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::error::ServiceError;

/// Proof of a captured payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub amount: Money,
}

/// Opaque payment gateway. Calls may be slow and may fail.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Captures `amount` for an order.
    async fn charge(
        &self,
        order_id: AggregateId,
        amount: Money,
        method: &PaymentMethod,
    ) -> Result<PaymentReceipt, ServiceError>;

    /// Returns a captured amount to the customer.
    async fn refund(&self, payment_id: &str, amount: Money) -> Result<(), ServiceError>;

    /// Reverses whatever was captured for `order_id` by a charge whose answer
    /// never arrived. Returns whether anything was reversed.
    async fn void_charge(&self, order_id: AggregateId) -> Result<bool, ServiceError>;
}

#[derive(Debug, Default)]
struct PaymentState {
    payments: HashMap<String, (AggregateId, Money)>,
    refunds: Vec<String>,
    next_id: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
    charge_delay: Option<Duration>,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<PaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to decline charges.
    pub fn set_fail_on_charge(&self, fail: bool) {
        lock_state(&self.state).fail_on_charge = fail;
    }

    /// Configures the service to fail refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        lock_state(&self.state).fail_on_refund = fail;
    }

    /// Makes every charge take `delay` before answering.
    pub fn set_charge_delay(&self, delay: Option<Duration>) {
        lock_state(&self.state).charge_delay = delay;
    }

    /// Returns the number of captured, unrefunded payments.
    pub fn payment_count(&self) -> usize {
        lock_state(&self.state).payments.len()
    }

    pub fn has_payment(&self, payment_id: &str) -> bool {
        lock_state(&self.state).payments.contains_key(payment_id)
    }

    /// Payment ids refunded so far, in order.
    pub fn refunds(&self) -> Vec<String> {
        lock_state(&self.state).refunds.clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: AggregateId,
        amount: Money,
        _method: &PaymentMethod,
    ) -> Result<PaymentReceipt, ServiceError> {
        let delay = lock_state(&self.state).charge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock_state(&self.state);
        if state.fail_on_charge {
            return Err(ServiceError::Rejected {
                service: "payment",
                reason: "Payment declined".to_string(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(payment_id.clone(), (order_id, amount));

        Ok(PaymentReceipt { payment_id, amount })
    }

    async fn refund(&self, payment_id: &str, _amount: Money) -> Result<(), ServiceError> {
        let mut state = lock_state(&self.state);
        if state.fail_on_refund {
            return Err(ServiceError::Unavailable {
                service: "payment",
                reason: "refund endpoint unavailable".to_string(),
            });
        }
        if state.payments.remove(payment_id).is_none() {
            return Err(ServiceError::Rejected {
                service: "payment",
                reason: format!("unknown payment {payment_id}"),
            });
        }
        state.refunds.push(payment_id.to_string());
        Ok(())
    }

    async fn void_charge(&self, order_id: AggregateId) -> Result<bool, ServiceError> {
        let mut state = lock_state(&self.state);
        if state.fail_on_refund {
            return Err(ServiceError::Unavailable {
                service: "payment",
                reason: "refund endpoint unavailable".to_string(),
            });
        }
        let mut voided: Vec<String> = state
            .payments
            .iter()
            .filter(|(_, (order, _))| *order == order_id)
            .map(|(payment_id, _)| payment_id.clone())
            .collect();
        voided.sort();
        for payment_id in &voided {
            state.payments.remove(payment_id);
        }
        state.refunds.extend(voided.iter().cloned());
        Ok(!voided.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_charge_and_refund() {
        let service = InMemoryPaymentService::new();
        let amount = Money::from_cents(5000);

        let receipt = service
            .charge(AggregateId::new(), amount, &PaymentMethod::card("tok_visa"))
            .await
            .unwrap();
        assert!(receipt.payment_id.starts_with("PAY-"));
        assert_eq!(receipt.amount, amount);
        assert!(service.has_payment(&receipt.payment_id));

        service.refund(&receipt.payment_id, amount).await.unwrap();
        assert_eq!(service.payment_count(), 0);
        assert_eq!(service.refunds(), vec![receipt.payment_id]);
    }

    #[tokio::test]
    async fn test_declined_charge() {
        let service = InMemoryPaymentService::new();
        service.set_fail_on_charge(true);

        let err = service
            .charge(AggregateId::new(), Money::from_cents(1), &PaymentMethod::card("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { .. }));
        assert_eq!(service.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_payment_ids() {
        let service = InMemoryPaymentService::new();
        let method = PaymentMethod::card("tok");
        let order_id = AggregateId::new();

        let r1 = service.charge(order_id, Money::from_cents(1), &method).await.unwrap();
        let r2 = service.charge(order_id, Money::from_cents(1), &method).await.unwrap();

        assert_eq!(r1.payment_id, "PAY-0001");
        assert_eq!(r2.payment_id, "PAY-0002");
    }

    #[tokio::test]
    async fn test_void_charge_reverses_captures_for_order() {
        let service = InMemoryPaymentService::new();
        let method = PaymentMethod::card("tok");
        let order_id = AggregateId::new();
        let other = service
            .charge(AggregateId::new(), Money::from_cents(7), &method)
            .await
            .unwrap();
        let receipt = service
            .charge(order_id, Money::from_cents(10), &method)
            .await
            .unwrap();

        assert!(service.void_charge(order_id).await.unwrap());
        assert!(!service.has_payment(&receipt.payment_id));
        assert!(service.has_payment(&other.payment_id));
        assert_eq!(service.refunds(), vec![receipt.payment_id]);

        assert!(!service.void_charge(order_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_slow_charge_captures_nothing() {
        let service = InMemoryPaymentService::new();
        service.set_charge_delay(Some(Duration::from_secs(600)));

        let method = PaymentMethod::card("t");
        let charge = service.charge(AggregateId::new(), Money::from_cents(5), &method);
        let result = tokio::time::timeout(Duration::from_secs(1), charge).await;

        assert!(result.is_err());
        assert_eq!(service.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_refund_failure_keeps_payment() {
        let service = InMemoryPaymentService::new();
        let receipt = service
            .charge(AggregateId::new(), Money::from_cents(10), &PaymentMethod::card("t"))
            .await
            .unwrap();

        service.set_fail_on_refund(true);
        assert!(service.refund(&receipt.payment_id, receipt.amount).await.is_err());
        assert!(service.has_payment(&receipt.payment_id));
    }
}
