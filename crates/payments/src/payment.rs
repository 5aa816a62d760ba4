use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pinke_core::{DomainError, DomainResult, PaymentId, Resolution, WorkItem, WorkMeta, WorkStatus};

/// Failure reason recorded when the provider never confirmed a payment in time.
pub const EXPIRED_REASON: &str = "payment expired";

/// Payment reconciliation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkStatus for PaymentStatus {
    const PENDING: Self = PaymentStatus::Pending;

    fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "settled" => Some(PaymentStatus::Settled),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    fn is_failure(&self) -> bool {
        matches!(self, PaymentStatus::Failed)
    }
}

/// What the payment provider reports for an order.
///
/// Serialized with a `state` tag so it maps directly onto the provider's JSON
/// body (`{"state": "paid", "transaction_id": "..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PaymentState {
    Paid {
        #[serde(default)]
        transaction_id: String,
    },
    Closed {
        #[serde(default)]
        reason: String,
    },
    Pending,
}

/// A payment awaiting confirmation from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_no: String,
    /// Amount in smallest currency unit (e.g., cents).
    pub amount_cents: i64,
    #[serde(flatten)]
    pub meta: WorkMeta<PaymentStatus>,
}

impl Payment {
    /// A new pending payment. Inputs are not validated here; invalid rows are
    /// failed by reconciliation.
    pub fn pending(order_no: impl Into<String>, amount_cents: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            order_no: order_no.into(),
            amount_cents,
            meta: WorkMeta::pending(at),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.order_no.trim().is_empty() {
            return Err(DomainError::validation("order number must not be empty"));
        }
        if self.amount_cents <= 0 {
            return Err(DomainError::validation(format!(
                "amount must be positive (got {})",
                self.amount_cents
            )));
        }
        Ok(())
    }

    /// Decide the outcome for a provider answer.
    ///
    /// Returns `None` when the payment is not yet actionable and should be looked
    /// at again on a later cycle.
    pub fn decide(
        &self,
        state: &PaymentState,
        now: DateTime<Utc>,
        expire_after: Duration,
    ) -> Option<Resolution<PaymentStatus>> {
        match state {
            PaymentState::Paid { transaction_id } if transaction_id.is_empty() => {
                Some(Resolution::new(PaymentStatus::Settled))
            }
            PaymentState::Paid { transaction_id } => {
                Some(Resolution::new(PaymentStatus::Settled).with_provider_ref(transaction_id.clone()))
            }
            PaymentState::Closed { reason } => {
                let reason = if reason.is_empty() {
                    "payment closed by provider"
                } else {
                    reason.as_str()
                };
                Some(Resolution::with_reason(PaymentStatus::Failed, reason))
            }
            PaymentState::Pending if self.is_expired(now, expire_after) => {
                Some(Resolution::with_reason(PaymentStatus::Failed, EXPIRED_REASON))
            }
            PaymentState::Pending => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expire_after: Duration) -> bool {
        now - self.meta.created_at >= expire_after
    }
}

impl WorkItem for Payment {
    type Status = PaymentStatus;

    const KIND: &'static str = "payment";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn meta(&self) -> &WorkMeta<PaymentStatus> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut WorkMeta<PaymentStatus> {
        &mut self.meta
    }
}
