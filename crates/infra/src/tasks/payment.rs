//! Payment reconciliation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pinke_core::Resolution;
use pinke_payments::{Payment, PaymentStatus};
use pinke_tasks::{CycleReport, Task, TaskContext, TaskError};

use super::{process_batch, Decision};
use crate::config::PaymentTaskConfig;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::store::WorkItemStore;

pub const PAYMENT_TASK: &str = "payment";

/// Settles or fails pending payments according to the provider.
///
/// Payments younger than the grace window are left alone; payments the provider
/// still reports as pending after `expire_after` are failed.
pub struct PaymentTask {
    store: Arc<dyn WorkItemStore<Payment>>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentTaskConfig,
}

impl PaymentTask {
    pub fn new(
        store: Arc<dyn WorkItemStore<Payment>>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentTaskConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    async fn decide(&self, payment: Payment, now: DateTime<Utc>) -> Decision<PaymentStatus> {
        if let Err(e) = payment.validate() {
            return Decision::Resolve(Resolution::with_reason(PaymentStatus::Failed, e.to_string()));
        }

        match self.gateway.query_payment(&payment).await {
            Ok(state) => match payment.decide(&state, now, self.config.expire_after()) {
                Some(resolution) => Decision::Resolve(resolution),
                None => Decision::Defer,
            },
            Err(GatewayError::Transient(msg)) => Decision::Retry(msg),
            Err(GatewayError::Permanent(msg)) => Decision::Resolve(Resolution::with_reason(
                PaymentStatus::Failed,
                format!("provider error: {msg}"),
            )),
        }
    }
}

#[async_trait]
impl Task for PaymentTask {
    fn name(&self) -> &str {
        PAYMENT_TASK
    }

    fn interval(&self) -> Duration {
        self.config.schedule.interval()
    }

    fn enabled(&self) -> bool {
        self.config.schedule.enabled
    }

    async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError> {
        let now = Utc::now();
        let cutoff = now - self.config.grace_window();
        process_batch(
            PAYMENT_TASK,
            self.store.as_ref(),
            ctx,
            cutoff,
            self.config.schedule.batch_size,
            self.gateway.call_timeout(),
            |payment| self.decide(payment, now),
        )
        .await
    }
}
