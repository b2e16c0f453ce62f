//! Route tests against an in-memory store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use db::MemoryDatabase;
use engine::{Engine, EngineConfig, WorkflowRuntime};

use super::{router, AppState};

fn app() -> Router {
    let engine = Engine::new(Arc::new(MemoryDatabase::new())).with_config(EngineConfig {
        production: false,
        ..EngineConfig::default()
    });
    router(AppState::new(WorkflowRuntime::new(engine)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("route request");

    let response = app.clone().oneshot(request).await.expect("route response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("route body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("route body json")
    };
    (status, body)
}

/// `echo → manual → echo`, enabled.
fn approval_flow() -> Value {
    json!({
        "title": "approval",
        "enabled": true,
        "trigger_type": "manual",
        "nodes": [
            { "id": 1, "type": "echo", "downstream_id": 2, "config": { "value": "{{$context.amount}}" } },
            { "id": 2, "type": "manual", "upstream_id": 1, "downstream_id": 3 },
            { "id": 3, "type": "echo", "upstream_id": 2 }
        ]
    })
}

#[tokio::test]
async fn execute_suspend_and_resume() {
    let app = app();

    let (status, workflow) = call(&app, "POST", "/api/v1/workflows", Some(approval_flow())).await;
    assert_eq!(status, StatusCode::CREATED);
    let workflow_id = workflow["id"].as_i64().expect("workflow id");

    let (status, fetched) = call(&app, "GET", &format!("/api/v1/workflows/{workflow_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["nodes"].as_array().map(Vec::len), Some(3));

    let (status, execution) = call(
        &app,
        "POST",
        &format!("/api/v1/workflows/{workflow_id}/execute"),
        Some(json!({ "context": { "amount": 40 } })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(execution["status"], json!(0));
    let execution_id = execution["id"].as_i64().expect("execution id");

    let (status, inspected) = call(&app, "GET", &format!("/api/v1/executions/{execution_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = inspected["jobs"].as_array().expect("jobs");
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["result"], json!(40));
    assert_eq!(jobs[1]["status"], json!(0));
    let pending = jobs[1]["id"].as_i64().expect("job id");

    let (status, resumed) = call(
        &app,
        "POST",
        &format!("/api/v1/jobs/{pending}/resume"),
        Some(json!({ "status": 1, "result": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], json!(1));

    let (_, inspected) = call(&app, "GET", &format!("/api/v1/executions/{execution_id}"), None).await;
    assert_eq!(inspected["jobs"].as_array().map(Vec::len), Some(3));

    // Ended executions refuse further resumes.
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/jobs/{pending}/resume"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, executions) = call(
        &app,
        "GET",
        &format!("/api/v1/workflows/{workflow_id}/executions"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executions.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn webhook_triggers_registered_path_only() {
    let app = app();
    let definition = json!({
        "title": "hook",
        "enabled": true,
        "trigger_type": "webhook",
        "config": { "path": "orders" },
        "nodes": [{ "id": 1, "type": "echo", "config": { "value": "{{$context.order}}" } }]
    });
    let (status, _) = call(&app, "POST", "/api/v1/workflows", Some(definition)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, execution) = call(&app, "POST", "/api/v1/webhook/orders", Some(json!({ "order": 7 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(execution["status"], json!(1));
    assert_eq!(execution["context"], json!({ "order": 7 }));

    let (status, body) = call(&app, "POST", "/api/v1/webhook/nowhere", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("nowhere")));
}

#[tokio::test]
async fn invalid_definitions_are_rejected() {
    let app = app();
    let definition = json!({
        "title": "two roots",
        "trigger_type": "manual",
        "nodes": [{ "id": 1, "type": "echo" }, { "id": 2, "type": "echo" }]
    });
    let (status, _) = call(&app, "POST", "/api/v1/workflows", Some(definition)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, workflows) = call(&app, "GET", "/api/v1/workflows", None).await;
    assert_eq!(workflows, json!([]));
}

#[tokio::test]
async fn unknown_and_disabled_resources() {
    let app = app();

    let (status, _) = call(&app, "GET", "/api/v1/workflows/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/api/v1/executions/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "POST", "/api/v1/jobs/404/resume", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut definition = approval_flow();
    definition["enabled"] = json!(false);
    let (_, workflow) = call(&app, "POST", "/api/v1/workflows", Some(definition)).await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/execute", workflow["id"]),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
