use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pinke_core::{DomainError, DomainResult, PaymentId, RefundId, Resolution, WorkItem, WorkMeta, WorkStatus};

use crate::payment::{Payment, PaymentStatus};

/// Refund processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Refunded,
    Failed,
}

impl core::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkStatus for RefundStatus {
    const PENDING: Self = RefundStatus::Pending;

    fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Refunded => "refunded",
            RefundStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RefundStatus::Pending),
            "refunded" => Some(RefundStatus::Refunded),
            "failed" => Some(RefundStatus::Failed),
            _ => None,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, RefundStatus::Pending)
    }

    fn is_failure(&self) -> bool {
        matches!(self, RefundStatus::Failed)
    }
}

/// Provider answer to a refund submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RefundState {
    Refunded {
        #[serde(default)]
        refund_ref: String,
    },
    Rejected {
        #[serde(default)]
        reason: String,
    },
}

/// A refund requested against a settled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub payment_id: PaymentId,
    /// Amount in smallest currency unit (e.g., cents).
    pub amount_cents: i64,
    pub reason: String,
    #[serde(flatten)]
    pub meta: WorkMeta<RefundStatus>,
}

impl Refund {
    pub fn pending(
        payment_id: PaymentId,
        amount_cents: i64,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RefundId::new(),
            payment_id,
            amount_cents,
            reason: reason.into(),
            meta: WorkMeta::pending(at),
        }
    }

    /// A pending refund of `amount_cents` against `payment`.
    ///
    /// Only settled payments can be refunded, and never for more than was paid.
    pub fn against(
        payment: &Payment,
        amount_cents: i64,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if payment.meta.status != PaymentStatus::Settled {
            return Err(DomainError::invariant(format!(
                "payment is {}, only settled payments can be refunded",
                payment.meta.status
            )));
        }
        if amount_cents > payment.amount_cents {
            return Err(DomainError::invariant(format!(
                "refund amount {} exceeds the payment amount {}",
                amount_cents, payment.amount_cents
            )));
        }

        let refund = Self::pending(payment.id, amount_cents, reason, at);
        refund.validate()?;
        Ok(refund)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.amount_cents <= 0 {
            return Err(DomainError::validation(format!(
                "refund amount must be positive (got {})",
                self.amount_cents
            )));
        }
        Ok(())
    }

    pub fn decide(&self, state: &RefundState) -> Resolution<RefundStatus> {
        match state {
            RefundState::Refunded { refund_ref } if refund_ref.is_empty() => {
                Resolution::new(RefundStatus::Refunded)
            }
            RefundState::Refunded { refund_ref } => {
                Resolution::new(RefundStatus::Refunded).with_provider_ref(refund_ref.clone())
            }
            RefundState::Rejected { reason } if reason.is_empty() => {
                Resolution::with_reason(RefundStatus::Failed, "refund rejected by provider")
            }
            RefundState::Rejected { reason } => {
                Resolution::with_reason(RefundStatus::Failed, reason.clone())
            }
        }
    }
}

impl WorkItem for Refund {
    type Status = RefundStatus;

    const KIND: &'static str = "refund";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn meta(&self) -> &WorkMeta<RefundStatus> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut WorkMeta<RefundStatus> {
        &mut self.meta
    }
}
