//! 存活探针
//!
//! 只报告进程存活，不检查 broker、存储或消费任务的状态。

use std::sync::Arc;

use axum::{Json, Router, extract::State, middleware, routing::get};
use notify_shared::observability::middleware as obs_middleware;
use serde_json::{Value, json};

#[derive(Clone)]
struct HealthState {
    service_name: Arc<str>,
}

/// 构建服务端口的路由，仅包含 `GET /health`
pub fn router(service_name: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(HealthState {
            service_name: Arc::from(service_name),
        })
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name.as_ref()
    }))
}
