use axum::{
    Router,
    extract::{ConnectInfo, Extension, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::protocol::{ENDPOINT_PING, ENDPOINT_WORKERS, PingQuery, render_worker_list};
use super::service::WorkerRegistry;

/// `/ping` and `/workers`. The server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()` so `/ping` can see
/// the caller's address.
pub fn router(registry: Arc<WorkerRegistry>) -> Router {
    Router::new()
        .route(ENDPOINT_PING, get(handle_ping))
        .route(ENDPOINT_WORKERS, get(handle_workers))
        .layer(Extension(registry))
}

pub async fn handle_ping(
    Extension(registry): Extension<Arc<WorkerRegistry>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<PingQuery>,
) -> Response {
    let (Some(id), Some(port)) = (query.id, query.port) else {
        return (StatusCode::BAD_REQUEST, "id and port are required").into_response();
    };
    if id.is_empty() || id.contains(',') || id.contains('\n') {
        return (StatusCode::BAD_REQUEST, "malformed worker id").into_response();
    }

    let id = registry.heartbeat(&id, &remote.ip().to_string(), port);
    tracing::debug!("Heartbeat from {} ({})", id, remote);
    (StatusCode::OK, "OK").into_response()
}

pub async fn handle_workers(Extension(registry): Extension<Arc<WorkerRegistry>>) -> Response {
    let workers = registry.list_workers();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        render_worker_list(&workers),
    )
        .into_response()
}
