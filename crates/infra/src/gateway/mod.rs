//! External payment provider clients.
//!
//! - [`HttpGateway`]: the provider's REST API
//! - [`SandboxGateway`]: in-process provider for dev runs and tests

pub mod http;
pub mod sandbox;

use std::time::Duration;

use async_trait::async_trait;

use pinke_payments::{Payment, PaymentState, Refund, RefundState};

pub use http::HttpGateway;
pub use sandbox::SandboxGateway;

/// Provider call error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Timeout, connection failure or provider-side 5xx; the next tick retries.
    #[error("gateway unavailable: {0}")]
    Transient(String),

    /// The provider refused the request or answered with an unusable body.
    #[error("gateway rejected request: {0}")]
    Permanent(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Current provider-side state of the payment's order.
    async fn query_payment(&self, payment: &Payment) -> Result<PaymentState, GatewayError>;

    /// Upper bound of one call. A cycle does not start a call it cannot finish.
    fn call_timeout(&self) -> Duration {
        Duration::ZERO
    }
}

#[async_trait]
pub trait RefundGateway: Send + Sync {
    /// Submit a refund; the provider answers synchronously.
    async fn submit_refund(&self, refund: &Refund) -> Result<RefundState, GatewayError>;

    fn call_timeout(&self) -> Duration {
        Duration::ZERO
    }
}
