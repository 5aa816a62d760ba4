//! Payments and refunds domain module.
//!
//! Pure decision rules for the two money-moving workflows: reconciling pending
//! payments against the payment provider, and submitting pending refunds. No IO;
//! the provider answers are passed in as values.

pub mod payment;
pub mod refund;

pub use payment::{Payment, PaymentState, PaymentStatus, EXPIRED_REASON};
pub use refund::{Refund, RefundState, RefundStatus};
