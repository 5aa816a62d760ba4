use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use pinke_api::app::AppServices;
use pinke_infra::config::AppConfig;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(start_tasks: bool) -> Self {
        // Same wiring as prod: in-memory stores and the sandbox provider on
        // empty URLs, with fast schedules so tests converge quickly.
        let mut config = AppConfig::default();
        config.tasks.payment.schedule.interval_ms = 20;
        config.tasks.payment.grace_window_secs = 0;
        config.tasks.refund.interval_ms = 20;
        config.tasks.group.interval_ms = 20;

        let services = Arc::new(pinke_api::app::build_services(&config).await.unwrap());
        if start_tasks {
            services.manager.start();
        }

        let app = pinke_api::app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post_json(client: &reqwest::Client, url: String, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let res = client.post(url).json(&body).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

/// Poll `url` until its `status` field equals `expected`.
async fn status_eventually(client: &reqwest::Client, url: String, expected: &str) -> serde_json::Value {
    // Background tasks resolve rows asynchronously; poll briefly.
    for _ in 0..100 {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] == expected {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("{url} did not reach status {expected} within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(false).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn created_payment_is_settled_by_background_task() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        srv.url("/payments"),
        json!({"order_no": "ORD-100", "amount_cents": 2500}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["processed_count"], 0);

    let id = body["id"].as_str().unwrap().to_string();
    let settled = status_eventually(&client, srv.url(&format!("/payments/{id}")), "settled").await;
    assert_eq!(settled["processed_count"], 1);
    assert_eq!(settled["provider_ref"], format!("sandbox-{id}"));
    assert_eq!(settled["order_no"], "ORD-100");

    let report = srv.services.manager.stop().await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn invalid_payment_is_rejected() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        srv.url("/payments"),
        json!({"order_no": "ORD-1", "amount_cents": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].as_str().unwrap().contains("amount"));
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url(&format!("/payments/{}", uuid::Uuid::now_v7())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client.get(srv.url("/groups/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn refund_requires_a_settled_payment() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let (_, payment) = post_json(
        &client,
        srv.url("/payments"),
        json!({"order_no": "ORD-200", "amount_cents": 1000}),
    )
    .await;

    let (status, body) = post_json(
        &client,
        srv.url("/refunds"),
        json!({"payment_id": payment["id"], "amount_cents": 500, "reason": "damaged"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invariant_violation");
}

#[tokio::test]
async fn refund_against_unknown_payment_is_not_found() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        srv.url("/refunds"),
        json!({"payment_id": uuid::Uuid::now_v7(), "amount_cents": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["message"], "payment not found");
}

#[tokio::test]
async fn refund_flows_through_to_refunded() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let (_, payment) = post_json(
        &client,
        srv.url("/payments"),
        json!({"order_no": "ORD-300", "amount_cents": 1000}),
    )
    .await;
    let payment_id = payment["id"].as_str().unwrap().to_string();
    status_eventually(&client, srv.url(&format!("/payments/{payment_id}")), "settled").await;

    let (status, body) = post_json(
        &client,
        srv.url("/refunds"),
        json!({"payment_id": payment_id, "amount_cents": 2000}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, refund) = post_json(
        &client,
        srv.url("/refunds"),
        json!({"payment_id": payment_id, "amount_cents": 400, "reason": "damaged"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(refund["status"], "pending");

    let id = refund["id"].as_str().unwrap().to_string();
    let done = status_eventually(&client, srv.url(&format!("/refunds/{id}")), "refunded").await;
    assert_eq!(done["reason"], "damaged");
    assert!(done["provider_ref"].as_str().unwrap().starts_with("sandbox-"));
    assert!(done["failure_reason"].is_null());
}

#[tokio::test]
async fn group_past_deadline_expires_when_short_of_members() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        srv.url("/groups"),
        json!({"title": "", "required_members": 2, "deadline": Utc::now()}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, group) = post_json(
        &client,
        srv.url("/groups"),
        json!({
            "title": "office coffee",
            "required_members": 3,
            "joined_members": 1,
            "deadline": Utc::now() - ChronoDuration::seconds(1),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["status"], "open");

    let id = group["id"].as_str().unwrap().to_string();
    let expired = status_eventually(&client, srv.url(&format!("/groups/{id}")), "expired").await;
    assert_eq!(expired["failure_reason"], "not enough members (1/3)");
}

#[tokio::test]
async fn admin_lists_registered_tasks() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/admin/tasks")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();

    assert_eq!(body["running"], true);
    let names: Vec<&str> = body["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["payment", "refund", "group"]);
    assert_eq!(body["tasks"][0]["interval_ms"], 20);
    assert!(body["tasks"][0]["stats"]["cycles"].is_u64());
}
