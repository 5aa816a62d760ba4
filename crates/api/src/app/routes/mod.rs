use axum::Router;

pub mod admin;
pub mod groups;
pub mod payments;
pub mod refunds;
pub mod system;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/payments", payments::router())
        .nest("/refunds", refunds::router())
        .nest("/groups", groups::router())
        .nest("/admin", admin::router())
}
