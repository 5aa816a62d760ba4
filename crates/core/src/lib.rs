//! `pinke-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the work-item contract shared by every
//! background workflow (payments, refunds, group orders).

pub mod error;
pub mod id;
pub mod work_item;

pub use error::{DomainError, DomainResult};
pub use id::{GroupOrderId, PaymentId, RefundId};
pub use work_item::{Resolution, WorkItem, WorkMeta, WorkStatus};
