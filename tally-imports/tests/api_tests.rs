//! HTTP surface: routing, tenant headers, status codes and payload shapes

mod helpers;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tally_imports::build_router;
use tower::ServiceExt;

fn app(ctx: &TestContext) -> Router {
    build_router(ctx.state.clone())
}

fn request(method: Method, uri: &str, tenant: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant-id", tenant).header("x-user-id", USER);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut req = request(method, uri, Some(TENANT), body);
    req.headers_mut().insert("x-role", "admin".parse().unwrap());
    req
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_bank_batch(app: &Router) -> String {
    let (status, body) = send_json(
        app,
        request(
            Method::POST,
            "/batches",
            Some(TENANT),
            Some(json!({"source_type": "bank", "origin": "api"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

fn bank_rows_payload() -> Value {
    json!({
        "rows": [
            bank_row("2024-08-01", "Coffee", "-4.50", "H-1"),
            bank_row("2024-08-02", "Refund", "abc", "H-2"),
        ]
    })
}

#[tokio::test]
async fn test_health_reports_ok() {
    let ctx = create_test_state().await.unwrap();
    let (status, body) = send_json(&app(&ctx), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tally-imports");
    assert!(body.get("ai_provider").is_none());
}

#[tokio::test]
async fn test_missing_tenant_header_is_unauthorized() {
    let ctx = create_test_state().await.unwrap();
    let (status, body) = send_json(&app(&ctx), request(Method::GET, "/batches", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_batch_lifecycle_over_http() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);
    let batch_id = create_bank_batch(&app).await;

    let (status, report) = send_json(
        &app,
        request(Method::POST, &format!("/batches/{}/rows", batch_id), Some(TENANT), Some(bank_rows_payload())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["inserted"], 2);
    assert_eq!(report["status"], "PARTIAL");

    let (status, items) = send_json(
        &app,
        request(
            Method::GET,
            &format!("/batches/{}/items?status=ERROR_VALIDATION", batch_id),
            Some(TENANT),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["idx"], 1);
    let item_id = items[0]["id"].as_str().unwrap().to_string();

    let (status, csv) = send(
        &app,
        request(Method::GET, &format!("/batches/{}/errors.csv", batch_id), Some(TENANT), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.lines().nth(1).unwrap().starts_with("1,ERROR_VALIDATION,validation,amount,"));

    let (status, item) = send_json(
        &app,
        request(
            Method::PATCH,
            &format!("/items/{}", item_id),
            Some(TENANT),
            Some(json!({"field": "amount", "value": "7.25"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["status"], "OK");

    let (status, summary) = send_json(
        &app,
        request(Method::POST, &format!("/batches/{}/promote", batch_id), Some(TENANT), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["created"], 2);
    assert_eq!(summary["status"], "PROMOTED");
}

#[tokio::test]
async fn test_other_tenant_sees_not_found() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);
    let batch_id = create_bank_batch(&app).await;

    let (status, body) = send_json(
        &app,
        request(Method::GET, &format!("/batches/{}", batch_id), Some(OTHER_TENANT), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_empty_rows_is_bad_request() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);
    let batch_id = create_bank_batch(&app).await;
    let (status, _) = send_json(
        &app,
        request(
            Method::POST,
            &format!("/batches/{}/rows", batch_id),
            Some(TENANT),
            Some(json!({"rows": []})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_role() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);
    let batch_id = create_bank_batch(&app).await;

    let (status, body) = send_json(
        &app,
        request(Method::DELETE, &format!("/admin/batches/{}", batch_id), Some(TENANT), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = send_json(&app, admin_request(Method::DELETE, &format!("/admin/batches/{}", batch_id), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_settings_validate_currency() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);

    let (status, _) = send_json(&app, admin_request(Method::PUT, "/settings", Some(json!({"default_currency": "euro"})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(&app, admin_request(Method::PUT, "/settings", Some(json!({"default_currency": "usd"})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_currency"], "USD");

    let (status, body) = send_json(&app, request(Method::GET, "/settings", Some(TENANT), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_currency"], "USD");
}

#[tokio::test]
async fn test_mapping_in_use_cannot_be_deleted() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);

    let (status, mapping) = send_json(
        &app,
        request(
            Method::POST,
            "/mappings",
            Some(TENANT),
            Some(json!({
                "name": "Bank export",
                "source_type": "bank",
                "fields": {"amount": ["Importe"], "date": ["Fecha"]}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let mapping_id = mapping["id"].as_str().unwrap().to_string();

    let (status, _) = send_json(
        &app,
        request(
            Method::POST,
            "/batches",
            Some(TENANT),
            Some(json!({"source_type": "bank", "origin": "api", "mapping_id": mapping_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(
        &app,
        request(Method::DELETE, &format!("/mappings/{}", mapping_id), Some(TENANT), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_mapping_without_sources_rejected_and_unused_deleted() {
    let ctx = create_test_state().await.unwrap();
    let app = app(&ctx);

    let (status, _) = send_json(
        &app,
        request(
            Method::POST,
            "/mappings",
            Some(TENANT),
            Some(json!({"name": "Broken", "fields": {"amount": []}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, mapping) = send_json(
        &app,
        request(Method::POST, "/mappings", Some(TENANT), Some(json!({"name": "Unused"}))),
    )
    .await;
    let uri = format!("/mappings/{}", mapping["id"].as_str().unwrap());
    let (status, _) = send(&app, request(Method::DELETE, &uri, Some(TENANT), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, request(Method::DELETE, &uri, Some(TENANT), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
