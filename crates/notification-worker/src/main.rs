//! 通知工作者服务
//!
//! 消费 RabbitMQ 通知事件写入 MongoDB，并提供存活探针。

use std::sync::Arc;

use anyhow::{Context, Result};
use notify_shared::{
    config::{AppConfig, DEFAULT_SERVICE_NAME},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use notification_worker::store::MongoNotificationStore;
use notification_worker::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：共享 .env、config/*.toml 与环境变量
    let config = AppConfig::load(DEFAULT_SERVICE_NAME).context("加载配置失败")?;

    // 2. 初始化可观测性并注入服务名
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-worker...");
    info!(
        environment = %config.environment,
        queue = %config.amqp.queue,
        database = %config.mongo.database,
        collection = %config.mongo.collection,
        "Configuration loaded"
    );

    // 3. 创建 MongoDB 客户端（按需建连，存储不可达不阻止启动）
    let db = Database::connect(&config.mongo).await?;
    tokio::spawn({
        let db = db.clone();
        async move {
            match db.health_check().await {
                Ok(()) => info!("MongoDB connection established"),
                Err(e) => warn!(error = %e, "MongoDB 暂不可达，写入失败的消息将按配置处置"),
            }
        }
    });
    let store = Arc::new(MongoNotificationStore::new(&db, &config.mongo.collection));

    // 4. 绑定服务端口
    let listener = TcpListener::bind(config.server_addr())
        .await
        .with_context(|| format!("绑定 {} 失败", config.server_addr()))?;
    info!("Listening on {}", config.server_addr());

    // 5. 启动消费任务与存活探针，直到收到关闭信号
    Supervisor::new(config, store)
        .run(listener, shutdown_signal())
        .await?;

    info!("Service shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
/// 信号处理器注册失败时只记录日志，该路径不再触发关闭。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
