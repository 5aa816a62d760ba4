//! In-process provider.
//!
//! Answers every payment as paid and every refund as refunded unless a script
//! was installed for the order number (payments) or payment id (refunds).
//! Scripted answers are consumed in order; the last one repeats.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use pinke_core::PaymentId;
use pinke_payments::{Payment, PaymentState, Refund, RefundState};

use super::{GatewayError, PaymentGateway, RefundGateway};

type Script<K, T> = Mutex<HashMap<K, VecDeque<Result<T, GatewayError>>>>;

#[derive(Default)]
pub struct SandboxGateway {
    payments: Script<String, PaymentState>,
    refunds: Script<PaymentId, RefundState>,
    calls: AtomicUsize,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_payment<I>(&self, order_no: impl Into<String>, answers: I)
    where
        I: IntoIterator<Item = Result<PaymentState, GatewayError>>,
    {
        self.payments
            .lock()
            .insert(order_no.into(), answers.into_iter().collect());
    }

    pub fn script_refund<I>(&self, payment_id: PaymentId, answers: I)
    where
        I: IntoIterator<Item = Result<RefundState, GatewayError>>,
    {
        self.refunds
            .lock()
            .insert(payment_id, answers.into_iter().collect());
    }

    /// Total provider calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn next_answer<K, T>(script: &Script<K, T>, key: &K) -> Option<Result<T, GatewayError>>
where
    K: Eq + Hash,
    T: Clone,
{
    let mut script = script.lock();
    let queue = script.get_mut(key)?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn query_payment(&self, payment: &Payment) -> Result<PaymentState, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next_answer(&self.payments, &payment.order_no).unwrap_or_else(|| {
            Ok(PaymentState::Paid {
                transaction_id: format!("sandbox-{}", payment.id),
            })
        })
    }
}

#[async_trait]
impl RefundGateway for SandboxGateway {
    async fn submit_refund(&self, refund: &Refund) -> Result<RefundState, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next_answer(&self.refunds, &refund.payment_id).unwrap_or_else(|| {
            Ok(RefundState::Refunded {
                refund_ref: format!("sandbox-{}", refund.id),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn scripted_answers_are_consumed_and_last_repeats() {
        let gw = SandboxGateway::new();
        gw.script_payment(
            "ORD-1",
            [
                Err(GatewayError::Transient("timeout".into())),
                Ok(PaymentState::Pending),
            ],
        );
        let p = Payment::pending("ORD-1", 100, Utc::now());

        assert!(gw.query_payment(&p).await.unwrap_err().is_transient());
        assert_eq!(gw.query_payment(&p).await.unwrap(), PaymentState::Pending);
        assert_eq!(gw.query_payment(&p).await.unwrap(), PaymentState::Pending);
        assert_eq!(gw.calls(), 3);
    }

    #[tokio::test]
    async fn unscripted_orders_are_paid() {
        let gw = SandboxGateway::new();
        let p = Payment::pending("ORD-2", 100, Utc::now());
        assert!(matches!(
            gw.query_payment(&p).await.unwrap(),
            PaymentState::Paid { .. }
        ));
    }
}
