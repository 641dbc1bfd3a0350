use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::service::Coordinator;
use super::types::NodeStatus;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub metadata: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OwnerResponse {
    pub key: String,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AwaitQuery {
    pub count: usize,
    #[serde(default = "default_await_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_await_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AwaitResponse {
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddNodesRequest {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddNodesResponse {
    pub added: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveNodesRequest {
    pub names: Vec<String>,
}

pub fn admin_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/nodes", get(handle_list_nodes))
        .route("/nodes/add", post(handle_add_nodes))
        .route("/nodes/remove", post(handle_remove_nodes))
        .route("/metadata", get(handle_metadata))
        .route("/owner", get(handle_owner))
        .route("/await", get(handle_await))
        .route("/service/start", post(handle_start))
        .route("/service/stop", post(handle_stop))
        .route("/service/shutdown", post(handle_shutdown))
        .layer(Extension(coordinator))
}

pub async fn handle_list_nodes(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<Vec<NodeStatus>> {
    Json(coordinator.list_nodes().await)
}

pub async fn handle_metadata(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        metadata: coordinator.metadata().await.to_string(),
    })
}

pub async fn handle_owner(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Query(query): Query<OwnerQuery>,
) -> (StatusCode, Json<OwnerResponse>) {
    let owner = coordinator.node_for_key(&query.key).await;
    let status = if owner.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(OwnerResponse {
            key: query.key,
            owner,
        }),
    )
}

pub async fn handle_await(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Query(query): Query<AwaitQuery>,
) -> Json<AwaitResponse> {
    let ready = coordinator
        .await_nodes(query.count, Duration::from_millis(query.timeout_ms))
        .await;
    Json(AwaitResponse { ready })
}

pub async fn handle_start(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> (StatusCode, Json<SuccessResponse>) {
    success(coordinator.start_service().await)
}

pub async fn handle_stop(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> (StatusCode, Json<SuccessResponse>) {
    success(coordinator.stop_service().await)
}

pub async fn handle_shutdown(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> (StatusCode, Json<SuccessResponse>) {
    success(coordinator.shutdown_service().await)
}

pub async fn handle_add_nodes(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<AddNodesRequest>,
) -> Json<AddNodesResponse> {
    Json(AddNodesResponse {
        added: coordinator.add_nodes(req.count).await,
    })
}

pub async fn handle_remove_nodes(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<RemoveNodesRequest>,
) -> (StatusCode, Json<SuccessResponse>) {
    if req.names.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SuccessResponse { success: false }),
        );
    }
    success(coordinator.remove_nodes(&req.names).await)
}

fn success(ok: bool) -> (StatusCode, Json<SuccessResponse>) {
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(SuccessResponse { success: ok }))
}
