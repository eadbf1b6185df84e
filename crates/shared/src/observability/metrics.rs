//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，服务端口只保留存活探针。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// `/metrics` 服务任务句柄
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装全局 Prometheus recorder 并在 `metrics_port` 上提供 `/metrics`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "notifications_consumed_total",
        "Total number of notification deliveries settled, by outcome"
    );
    metrics::describe_histogram!(
        "notification_persist_duration_seconds",
        "Document store insert duration in seconds"
    );

    metrics::describe_counter!(
        "consumer_restarts_total",
        "Total number of consumer task restarts"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标服务已启动");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    });

    Ok(server_handle)
}

/// 健康检查端口上的请求计数与耗时
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels).record(duration_secs);
}

/// 一条投递的处置结果：ack、reject、requeue 或 leave
pub fn record_notification_consumed(outcome: &str) {
    metrics::counter!(
        "notifications_consumed_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 单次 insert 的耗时
pub fn record_persist_duration(success: bool, duration_secs: f64) {
    metrics::histogram!(
        "notification_persist_duration_seconds",
        "success" => success.to_string()
    )
    .record(duration_secs);
}

/// `reason` 取 error、panic、stopped 或 cancelled
pub fn record_consumer_restart(reason: &str) {
    metrics::counter!(
        "consumer_restarts_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}
