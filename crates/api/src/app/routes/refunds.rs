use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use pinke_core::{DomainError, PaymentId, RefundId};
use pinke_payments::Refund;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_refund))
        .route("/:id", get(get_refund))
}

/// Queue a refund against a settled payment.
pub async fn create_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateRefundRequest>,
) -> axum::response::Response {
    let payment_id: PaymentId = match dto::parse_id(&body.payment_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let payment = match services.payments.get(payment_id.into()).await {
        Ok(Some(p)) => p,
        Ok(None) => return errors::domain_error_to_response(DomainError::not_found("payment")),
        Err(e) => return errors::store_error_to_response(e),
    };

    let refund = match Refund::against(&payment, body.amount_cents, body.reason, Utc::now()) {
        Ok(r) => r,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.refunds.insert(&refund).await {
        Ok(()) => (StatusCode::CREATED, Json(refund)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: RefundId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.refunds.get(id.into()).await {
        Ok(Some(refund)) => Json(refund).into_response(),
        Ok(None) => errors::domain_error_to_response(DomainError::not_found("refund")),
        Err(e) => errors::store_error_to_response(e),
    }
}
