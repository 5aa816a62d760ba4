use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use pinke_core::{DomainError, PaymentId};
use pinke_payments::Payment;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_payment))
        .route("/:id", get(get_payment))
}

pub async fn create_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreatePaymentRequest>,
) -> axum::response::Response {
    let payment = Payment::pending(body.order_no, body.amount_cents, Utc::now());
    if let Err(e) = payment.validate() {
        return errors::domain_error_to_response(e);
    }

    match services.payments.insert(&payment).await {
        Ok(()) => (StatusCode::CREATED, Json(payment)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PaymentId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.payments.get(id.into()).await {
        Ok(Some(payment)) => Json(payment).into_response(),
        Ok(None) => errors::domain_error_to_response(DomainError::not_found("payment")),
        Err(e) => errors::store_error_to_response(e),
    }
}
