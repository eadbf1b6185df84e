//! OpenTelemetry 追踪模块
//!
//! 提供日志与分布式追踪的初始化和配置。
//! 支持 OTLP 协议导出到 Jaeger/Tempo 等后端，并从 AMQP 消息头恢复上游追踪上下文。

use std::collections::HashMap;

use anyhow::Result;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::ObservabilityConfig;

/// Tracing 资源守卫
///
/// Drop 时关闭 TracerProvider，批量导出器中尚未发送的 span 会被刷新。
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("关闭 TracerProvider 失败: {e:?}");
        }
    }
}

/// 初始化 tracing（日志 + 可选的 OTLP 导出）
///
/// RUST_LOG 优先于配置中的 log_level。
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| init_tracer_provider(&config.service_name, endpoint))
        .transpose()?;

    // 未配置 OTLP 端点时为 None，Option<Layer> 本身即空 layer
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    if config.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }

    Ok(TracingGuard { provider })
}

/// 构建 OTLP gRPC 导出的 TracerProvider 并注册为全局 provider
fn init_tracer_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// 当前 span 的 trace ID，未接入 OpenTelemetry 时为 None
pub fn current_trace_id() -> Option<String> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

// ============================================================================
// 追踪上下文传播
// ============================================================================

/// AMQP 消息头的只读视图
struct AmqpHeaders<'a>(&'a HashMap<String, String>);

impl Extractor for AmqpHeaders<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|s| s.as_str()).collect()
    }
}

/// 从消息头提取追踪上下文
///
/// 支持 W3C Trace Context 标准（traceparent, tracestate）。
/// 上游生产者把 traceparent 写入 AMQP 消息头即可串联链路。
pub fn extract_from_headers(headers: &HashMap<String, String>) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&AmqpHeaders(headers))
}

/// 用消息头中的追踪上下文设置指定 span 的父上下文
///
/// 消息头中没有有效 traceparent 时保持原样。
pub fn set_parent_from_headers(span: &tracing::Span, headers: &HashMap<String, String>) {
    let context = extract_from_headers(headers);
    if context.span().span_context().is_valid() {
        let _ = span.set_parent(context);
    }
}
