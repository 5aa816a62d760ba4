use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use pinke_core::{DomainError, GroupOrderId};
use pinke_groups::GroupOrder;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_group))
        .route("/:id", get(get_group))
}

pub async fn create_group(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateGroupRequest>,
) -> axum::response::Response {
    if let Err(e) = body.validate() {
        return errors::domain_error_to_response(e);
    }

    let order = GroupOrder::open(
        body.title,
        body.required_members,
        body.joined_members,
        body.deadline,
        Utc::now(),
    );

    match services.groups.insert(&order).await {
        Ok(()) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_group(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: GroupOrderId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.groups.get(id.into()).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => errors::domain_error_to_response(DomainError::not_found("group order")),
        Err(e) => errors::store_error_to_response(e),
    }
}
