//! 可观测性集成测试
//!
//! 指标通过本地 recorder 渲染后断言输出；追踪上下文只依赖 W3C 头解析。

use std::collections::HashMap;

use metrics_exporter_prometheus::PrometheusBuilder;
use notify_shared::observability::metrics::{
    record_consumer_restart, record_http_request, record_notification_consumed,
    record_persist_duration,
};
use notify_shared::observability::tracing::{extract_from_headers, set_parent_from_headers};
use notify_shared::observability::ObservabilityConfig;
use opentelemetry::trace::TraceContextExt;

/// 在独立 recorder 下执行 `f` 并返回 Prometheus 文本输出
fn render_with(f: impl FnOnce()) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, f);
    handle.render()
}

fn traceparent(value: &str) -> HashMap<String, String> {
    HashMap::from([("traceparent".to_string(), value.to_string())])
}

#[test]
fn test_consumed_outcomes_are_counted_by_label() {
    let output = render_with(|| {
        record_notification_consumed("ack");
        record_notification_consumed("ack");
        record_notification_consumed("requeue");
    });

    assert!(output.contains(r#"notifications_consumed_total{outcome="ack"} 2"#));
    assert!(output.contains(r#"notifications_consumed_total{outcome="requeue"} 1"#));
    assert!(!output.contains(r#"outcome="reject""#));
}

#[test]
fn test_persist_latency_split_by_success() {
    let output = render_with(|| {
        record_persist_duration(true, 0.004);
        record_persist_duration(false, 5.0);
        record_persist_duration(false, 4.0);
    });

    assert!(output.contains(r#"notification_persist_duration_seconds_count{success="true"} 1"#));
    assert!(output.contains(r#"notification_persist_duration_seconds_count{success="false"} 2"#));
}

#[test]
fn test_restart_and_http_metrics() {
    let output = render_with(|| {
        record_consumer_restart("panic");
        record_http_request("GET", "/health", 200, 0.001);
        record_http_request("GET", "/missing", 404, 0.001);
    });

    assert!(output.contains(r#"consumer_restarts_total{reason="panic"} 1"#));
    assert!(output.contains("http_requests_total{"));
    assert!(output.contains(r#"status="404""#));
}

#[test]
fn test_upstream_trace_context_survives_tracestate() {
    let mut headers = traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
    headers.insert("tracestate".to_string(), "congo=t61rcWkgMzE".to_string());
    // 与追踪无关的业务头不影响解析
    headers.insert("content-type".to_string(), "application/json".to_string());

    let context = extract_from_headers(&headers);
    let span = context.span();
    let span_context = span.span_context();
    assert!(span_context.is_valid());
    assert!(span_context.is_sampled());
    assert_eq!(span_context.span_id().to_string(), "00f067aa0ba902b7");
}

#[test]
fn test_truncated_or_garbled_traceparent_is_ignored() {
    for value in [
        "",
        "00-4bf92f3577b34da6a3ce929d0e0e4736",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
        "00-zzzz-00f067aa0ba902b7-01",
        "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
    ] {
        let context = extract_from_headers(&traceparent(value));
        assert!(!context.span().span_context().is_valid(), "{value}");

        let span = tracing::info_span!("notification");
        set_parent_from_headers(&span, &traceparent(value));
    }
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: ObservabilityConfig =
        serde_json::from_value(serde_json::json!({ "json_logs": true, "metrics_port": 9191 }))
            .unwrap();

    assert!(config.json_logs);
    assert_eq!(config.metrics_port, 9191);
    assert!(!config.metrics_enabled);
    assert_eq!(config.log_level, "info");
}
