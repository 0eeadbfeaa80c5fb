use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use swarm_core::SubmitError;
use swarm_store::TaskFilter;
use swarm_types::{SubmitRequest, TaskPriority, TaskStatus, TaskType};

use crate::auth::{is_valid_api_key, verify_token};
use crate::ws::ws_handler;
use crate::AppState;

#[derive(Debug, serde::Serialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

fn error_response(status: StatusCode, message: impl Into<String>, details: Option<Value>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: message.into(),
            details,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize, Default)]
struct TaskListQuery {
    status: Option<TaskStatus>,
    #[serde(rename = "type")]
    task_type: Option<TaskType>,
    priority: Option<TaskPriority>,
    offset: Option<usize>,
    limit: Option<usize>,
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/tasks", post(submit_tasks).get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/agents", get(list_agents))
        .route("/budget", get(budget_status))
        .route("/execute/batch", post(execute_batch))
        .route("/execute/{task_id}", post(execute_task))
        .layer(cors)
        .layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .with_state(state)
}

async fn auth_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    let path = request.uri().path();
    if path == "/health" {
        return next.run(request).await;
    }

    let Some(secret) = state.auth.secret.clone() else {
        return next.run(request).await;
    };

    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
    {
        if is_valid_api_key(key.trim()) {
            return next.run(request).await;
        }
        return error_response(StatusCode::UNAUTHORIZED, "invalid API key", None);
    }

    let token = bearer_token(request.headers()).or_else(|| {
        // The notification channel cannot set headers from a browser, so it
        // may carry the token as a query parameter instead.
        if path == "/ws" {
            query_param(request.uri().query(), "token")
        } else {
            None
        }
    });
    let Some(token) = token else {
        return error_response(StatusCode::UNAUTHORIZED, "missing bearer token", None);
    };
    match verify_token(&secret, &token) {
        Ok(_) => next.run(request).await,
        Err(error) => error_response(StatusCode::UNAUTHORIZED, error.to_string(), None),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;
    let trimmed = auth.trim();
    let bearer = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?;
    let token = bearer.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.orchestrator.store().ping().await.is_ok();
    let queue_depth = state
        .orchestrator
        .store()
        .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
        .await
        .map(|tasks| tasks.len())
        .unwrap_or(0);
    let active_agents = state
        .orchestrator
        .store()
        .active_agent_count()
        .await
        .unwrap_or(0);
    let active_jobs = state.orchestrator.provider().active_job_count().await;
    Json(json!({
        "healthy": store_ok,
        "mode": state.orchestrator.provider().name(),
        "topology": state.topology_kind,
        "queueDepth": queue_depth,
        "activeAgents": active_agents,
        "activeJobs": active_jobs,
        "version": env!("CARGO_PKG_VERSION"),
        "startedAt": state.started_at,
    }))
}

async fn submit_tasks(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    match state.orchestrator.submit(request).await {
        Ok(response) => Json(response).into_response(),
        Err(SubmitError::BudgetPaused) => {
            error_response(StatusCode::CONFLICT, "budget paused", None)
        }
        Err(SubmitError::Validation { details }) => error_response(
            StatusCode::BAD_REQUEST,
            "validation failed",
            Some(json!(details)),
        ),
        Err(SubmitError::Rejected { error }) => error_response(
            StatusCode::BAD_REQUEST,
            error.to_string(),
            Some(json!(error)),
        ),
        Err(SubmitError::Internal { message }) => {
            tracing::error!("submission failed: {message}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "submission failed", None)
        }
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Value>, StatusCode> {
    let filter = TaskFilter {
        status: query.status,
        task_type: query.task_type,
        priority: query.priority,
        offset: query.offset,
        limit: query.limit,
    };
    let tasks = state
        .orchestrator
        .store()
        .list_tasks(&filter)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"tasks": tasks, "count": tasks.len()})))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let task = match state.orchestrator.store().get_task(&id).await {
        Ok(task) => task,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store failure", None)
        }
    };
    let Some(task) = task else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown task {id}"), None);
    };
    let result = state.orchestrator.store().get_result(&id).await.ok().flatten();
    Json(json!({"task": task, "result": result})).into_response()
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.store().get_task(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("unknown task {id}"), None)
        }
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store failure", None)
        }
    }
    match state.orchestrator.cancel_task(&id).await {
        Ok(cancelled) => Json(json!({"taskId": id, "cancelled": cancelled})).into_response(),
        Err(error) => {
            tracing::error!("cancel of {id} failed: {error}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cancel failed", None)
        }
    }
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let agents = state
        .orchestrator
        .store()
        .list_agents()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut by_status: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for agent in &agents {
        let key = serde_json::to_value(agent.status)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        *by_status.entry(key).or_insert(0) += 1;
    }
    let active_locks = state.orchestrator.conflicts().active_lock_count().await;
    Ok(Json(json!({
        "agents": agents,
        "count": agents.len(),
        "byStatus": by_status,
        "activeLocks": active_locks,
    })))
}

async fn budget_status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let budget = state
        .orchestrator
        .budget()
        .state()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let projection = state
        .orchestrator
        .budget()
        .projection()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut body = serde_json::to_value(&budget).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("projectedDailyCents".to_string(), json!(projection));
    }
    Ok(Json(body))
}

async fn execute_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    match state.orchestrator.store().get_task(&task_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("unknown task {task_id}"),
                None,
            )
        }
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store failure", None)
        }
    }
    match state.orchestrator.force_execute(&task_id).await {
        Ok(started) => Json(json!({"taskId": task_id, "started": started})).into_response(),
        Err(error) => {
            tracing::error!("force execute of {task_id} failed: {error}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "execute failed", None)
        }
    }
}

async fn execute_batch(State(state): State<AppState>) -> Response {
    match state.orchestrator.force_execute_batch().await {
        Ok(started) => {
            Json(json!({"started": started, "count": started.len()})).into_response()
        }
        Err(error) => {
            tracing::error!("batch execute failed: {error}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "execute failed", None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    use swarm_core::topology::{HubTopology, TopologyHandler, TopologyKind};
    use swarm_core::{
        BudgetGuard, ConflictMonitor, DependencyGraph, EventBus, Orchestrator,
        OrchestratorConfig, PerformanceTracker, Router as TaskRouter, Scheduler,
    };
    use swarm_providers::MockProvider;
    use swarm_store::{MemoryStore, StateStore};

    use crate::auth::mint_token;
    use crate::AuthState;

    fn test_state(secret: Option<&str>) -> AppState {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn StateStore> = store;
        let bus = EventBus::new();
        let tracker = Arc::new(PerformanceTracker::new());
        let router = TaskRouter::new(tracker.clone());
        let scheduler = Scheduler::new(
            store_dyn.clone(),
            DependencyGraph::new(store_dyn.clone()),
            router.clone(),
            bus.clone(),
        );
        let topology: Arc<dyn TopologyHandler> = Arc::new(HubTopology::new(
            store_dyn.clone(),
            scheduler.clone(),
            bus.clone(),
        ));
        let orchestrator = Orchestrator::new(
            store_dyn.clone(),
            Arc::new(MockProvider::new()),
            topology,
            scheduler,
            router,
            tracker,
            Arc::new(ConflictMonitor::new(bus.clone())),
            BudgetGuard::new(store_dyn, bus.clone()),
            bus,
            OrchestratorConfig::default(),
        );
        AppState::new(
            orchestrator,
            AuthState {
                secret: secret.map(|s| s.to_string()),
            },
            TopologyKind::Hub,
        )
    }

    fn submit_body(prompt: &str) -> String {
        json!({
            "tasks": [{
                "type": "doc",
                "prompt": prompt,
                "context": {"branch": "main", "files": ["README.md"]}
            }]
        })
        .to_string()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let app = app_router(test_state(Some("secret")));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.get("mode").and_then(|v| v.as_str()), Some("mock"));
        assert_eq!(body.get("queueDepth").and_then(|v| v.as_u64()), Some(0));
    }

    #[tokio::test]
    async fn protected_routes_require_credentials() {
        let app = app_router(test_state(Some("secret")));
        for (method, uri) in [
            ("GET", "/tasks"),
            ("GET", "/agents"),
            ("GET", "/budget"),
            ("POST", "/execute/batch"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    HttpRequest::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn bearer_tokens_and_api_keys_are_accepted() {
        let app = app_router(test_state(Some("secret")));
        let token = mint_token("secret", "tester", 3600, &[]);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks")
                    .header("x-api-key", "sk_swarm_0123456789abcdef0123")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let app = app_router(test_state(Some("secret")));
        let token = mint_token("secret", "tester", -5, &[]);
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submission_round_trip() {
        let app = app_router(test_state(None));
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body("write the readme")))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let task_ids = body
            .get("taskIds")
            .and_then(|v| v.as_array())
            .expect("taskIds");
        assert_eq!(task_ids.len(), 1);
        assert_eq!(
            body.get("estimatedCostCents").and_then(|v| v.as_u64()),
            Some(100)
        );

        let task_id = task_ids[0].as_str().expect("id");
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/tasks/{task_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body.pointer("/task/prompt").and_then(|v| v.as_str()),
            Some("write the readme")
        );
        assert!(body.get("result").map(|v| v.is_null()).unwrap_or(true));
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_are_rejected() {
        let app = app_router(test_state(None));
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"tasks": []}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body.get("details").is_some());

        let task = json!({
            "type": "doc",
            "prompt": "p",
            "context": {"branch": "main"}
        });
        let tasks: Vec<Value> = (0..21).map(|_| task.clone()).collect();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "tasks": tasks }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn overlong_prompts_are_rejected() {
        let app = app_router(test_state(None));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body(&"x".repeat(50_001))))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let app = app_router(test_state(None));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks/does-not-exist")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_marks_the_task_cancelled() {
        let app = app_router(test_state(None));
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body("cancel me")))
                    .expect("request"),
            )
            .await
            .expect("response");
        let body = body_json(response).await;
        let task_id = body.pointer("/taskIds/0").and_then(|v| v.as_str()).expect("id").to_string();

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri(format!("/tasks/{task_id}/cancel"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.get("cancelled").and_then(|v| v.as_bool()), Some(true));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/tasks/{task_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(
            body.pointer("/task/status").and_then(|v| v.as_str()),
            Some("cancelled")
        );
    }

    #[tokio::test]
    async fn budget_includes_the_projection() {
        let app = app_router(test_state(None));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/budget")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body.get("projectedDailyCents").and_then(|v| v.as_u64()),
            Some(0)
        );
        assert_eq!(body.get("paused").and_then(|v| v.as_bool()), Some(false));
    }

    #[tokio::test]
    async fn task_listing_honours_status_filters() {
        let app = app_router(test_state(None));
        for prompt in ["one", "two"] {
            let response = app
                .clone()
                .oneshot(
                    HttpRequest::builder()
                        .method("POST")
                        .uri("/tasks")
                        .header("content-type", "application/json")
                        .body(Body::from(submit_body(prompt)))
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks?status=pending&limit=1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body.get("count").and_then(|v| v.as_u64()), Some(1));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/tasks?status=completed")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body.get("count").and_then(|v| v.as_u64()), Some(0));
    }
}
