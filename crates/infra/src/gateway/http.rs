//! REST client for the payment provider.
//!
//! - `GET  {base}/payments/{order_no}` → `{"state": "paid" | "closed" | "pending", ...}`
//! - `POST {base}/refunds`             → `{"state": "refunded" | "rejected", ...}`
//!
//! Timeouts, connection failures, 429 and 5xx responses are transient. Any other
//! non-success status or an unparseable body is permanent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use pinke_payments::{Payment, PaymentState, Refund, RefundState};

use super::{GatewayError, PaymentGateway, RefundGateway};
use crate::config::GatewayConfig;

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    refund_id: Uuid,
    payment_id: Uuid,
    amount_cents: i64,
    reason: &'a str,
}

/// Provider client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|e| {
            GatewayError::Permanent(format!("invalid gateway base url {:?}: {e}", config.base_url))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Permanent(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            timeout: config.timeout(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::Permanent(format!("gateway base url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn query_payment(&self, payment: &Payment) -> Result<PaymentState, GatewayError> {
        let url = self.endpoint(&["payments", payment.order_no.as_str()])?;
        debug!(%url, payment_id = %payment.id, "querying payment state");
        read_json(self.client.get(url).send().await).await
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl RefundGateway for HttpGateway {
    async fn submit_refund(&self, refund: &Refund) -> Result<RefundState, GatewayError> {
        let url = self.endpoint(&["refunds"])?;
        let body = RefundRequest {
            refund_id: *refund.id.as_uuid(),
            payment_id: *refund.payment_id.as_uuid(),
            amount_cents: refund.amount_cents,
            reason: &refund.reason,
        };
        debug!(%url, refund_id = %refund.id, "submitting refund");
        read_json(self.client.post(url).json(&body).send().await).await
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, GatewayError> {
    let response = response.map_err(map_reqwest_error)?;
    let status = response.status();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Transient(format!("provider answered {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Permanent(format!("provider answered {status}: {body}")));
    }

    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::Transient(format!("timed out reading provider body: {e}"))
        } else {
            GatewayError::Permanent(format!("malformed provider body: {e}"))
        }
    })
}

fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        GatewayError::Transient(err.to_string())
    } else {
        GatewayError::Permanent(err.to_string())
    }
}
