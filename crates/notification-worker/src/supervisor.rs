//! 进程监督
//!
//! 在独立任务中运行通知消费者，主任务提供存活探针。
//! 消费任务异常退出或 panic 后按指数退避重启；关闭信号到达时
//! 先停止 HTTP 服务，再通知消费任务退出并限时等待。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify_shared::config::AppConfig;
use notify_shared::observability::metrics;
use notify_shared::retry::{Backoff, RetryPolicy, sleep_unless_shutdown};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::consumer::NotificationConsumer;
use crate::error::NotificationError;
use crate::health;
use crate::store::NotificationStore;

/// 持续运行超过该时长的消费尝试视为健康，之后的故障重新从初始间隔退避
const HEALTHY_RUN_THRESHOLD: Duration = Duration::from_secs(60);

/// 监督循环的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// 收到关闭信号
    Shutdown,
    /// 重启次数耗尽，通知消费已停止
    GaveUp { restarts: u32 },
}

/// 监督消费任务
///
/// 每次尝试在独立任务中运行，panic 表现为 `JoinError` 而不会波及监督循环。
/// 尝试返回 Ok 且未收到关闭信号时同样视为异常并重启。
pub async fn supervise_consumer<F, Fut>(
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
    attempt: F,
) -> SupervisorExit
where
    F: Fn(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), NotificationError>> + Send + 'static,
{
    let mut backoff = Backoff::new(policy);

    loop {
        if *shutdown.borrow() {
            return SupervisorExit::Shutdown;
        }

        let started = Instant::now();
        let reason = match tokio::spawn(attempt(shutdown.clone())).await {
            Ok(Ok(())) => {
                if *shutdown.borrow() {
                    return SupervisorExit::Shutdown;
                }
                warn!("通知消费任务意外结束");
                "stopped"
            }
            Ok(Err(e)) => {
                error!(error = %e, kind = e.kind(), "通知消费任务异常退出");
                "error"
            }
            Err(e) if e.is_panic() => {
                error!(error = %e, "通知消费任务 panic");
                "panic"
            }
            Err(e) => {
                error!(error = %e, "通知消费任务被取消");
                "cancelled"
            }
        };

        if *shutdown.borrow() {
            return SupervisorExit::Shutdown;
        }

        if started.elapsed() >= HEALTHY_RUN_THRESHOLD {
            backoff.reset();
        }

        let Some(delay) = backoff.next_delay() else {
            let restarts = backoff.attempts();
            error!(restarts, "通知消费任务重启次数耗尽，停止消费");
            return SupervisorExit::GaveUp { restarts };
        };

        metrics::record_consumer_restart(reason);
        warn!(
            delay_ms = delay.as_millis() as u64,
            restart = backoff.attempts(),
            reason,
            "通知消费任务将在退避后重启"
        );

        if !sleep_unless_shutdown(delay, &mut shutdown).await {
            return SupervisorExit::Shutdown;
        }
    }
}

/// 进程监督者
///
/// 持有配置与存储句柄，负责拉起消费任务和存活探针。
pub struct Supervisor {
    config: AppConfig,
    store: Arc<dyn NotificationStore>,
}

impl Supervisor {
    pub fn new(config: AppConfig, store: Arc<dyn NotificationStore>) -> Self {
        Self { config, store }
    }

    /// 运行直到 `signal` 完成
    ///
    /// 消费任务放弃后存活探针继续对外服务。
    pub async fn run<S>(self, listener: TcpListener, signal: S) -> Result<(), NotificationError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let Self { config, store } = self;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = NotificationConsumer::new(&config, store);
        let consumer_task = tokio::spawn(supervise_consumer(
            config.consumer.restart.policy(),
            shutdown_rx,
            move |rx| consumer.clone().run(rx),
        ));

        let app = health::router(&config.service_name);
        info!(addr = ?listener.local_addr().ok(), "健康检查服务已启动");

        // 优雅关闭：停止接收新连接并等待已有请求处理完毕
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP 服务已停止，等待通知消费任务退出...");
        let _ = shutdown_tx.send(true);

        let timeout_secs = config.consumer.shutdown_timeout_seconds;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), consumer_task).await {
            Ok(Ok(exit)) => info!(?exit, "通知消费任务已退出"),
            Ok(Err(e)) => error!(error = %e, "监督任务异常退出"),
            Err(_) => warn!(timeout_secs, "等待通知消费任务退出超时"),
        }

        served.map_err(NotificationError::from)
    }
}
