//! Read-only operability routes (§6.2): `/healthz`, `/metrics`, `/engines`.
//!
//! Not the Control API itself — that surface (create/list/cancel instances,
//! definitions, schedules) is exposed by each component's plain async
//! methods and is wired up by whatever HTTP layer embeds this crate. This
//! module only exists so an operator can point a load balancer or a
//! dashboard at something.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::engine::WorkflowEngine;
use crate::model::EngineInstance;
use crate::store::WorkflowStore;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn WorkflowStore>,
    pub engine: Arc<WorkflowEngine>,
}

/// OpenAPI document for the read-only admin surface.
#[derive(OpenApi)]
#[openapi(
    paths(healthz, metrics, engines),
    components(schemas(HealthResponse, MetricsResponse, EngineInstance))
)]
pub struct AdminApiDoc;

pub fn routes(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/engines", get(engines))
        .with_state(state)
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: &'static str,
    engine_id: String,
}

#[utoipa::path(get, path = "/healthz", responses((status = 200, body = HealthResponse)))]
async fn healthz(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        engine_id: state.engine.engine_id().to_string(),
    })
}

#[derive(Serialize, ToSchema)]
struct MetricsResponse {
    engine_id: String,
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, body = MetricsResponse)))]
async fn metrics(State(state): State<AdminState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        engine_id: state.engine.engine_id().to_string(),
    })
}

#[utoipa::path(get, path = "/engines", responses((status = 200, body = [EngineInstance]), (status = 500)))]
async fn engines(State(state): State<AdminState>) -> Result<Json<Vec<EngineInstance>>, StatusCode> {
    state.store.list_engines().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "failed to list engines");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::event_bus::EventBus;
    use crate::executor::ExecutorRegistry;
    use crate::store::InMemoryWorkflowStore;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let executors = Arc::new(ExecutorRegistry::new());
        let events = Arc::new(EventBus::new(100));
        let engine = Arc::new(WorkflowEngine::new(store.clone(), executors, events, EngineConfig::default()));
        let app = routes(AdminState { store, engine });

        let response = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
