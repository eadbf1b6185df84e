//! 通知消费者
//!
//! 从 RabbitMQ 消费通知事件，解码后写入存储。
//! 仅在写入成功后确认消息；解码或写入失败时按配置的处置方式应答，消费循环继续。
//! 无法编码为 BSON 的负载按解码失败处理，避免反复重新入队阻塞队列。

use std::sync::Arc;
use std::time::{Duration, Instant};

use notify_shared::amqp::{AmqpConsumer, ConsumerMessage, Disposition, consumer_tag};
use notify_shared::config::{AmqpConfig, AppConfig, ConsumerConfig, FailureAction};
use notify_shared::events::{NotificationEvent, StoredNotification};
use notify_shared::observability::metrics;
use notify_shared::observability::tracing::{current_trace_id, set_parent_from_headers};
use notify_shared::retry::sleep_unless_shutdown;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span, warn};

use crate::error::NotificationError;
use crate::store::{InsertedNotification, NotificationStore};

// ---------------------------------------------------------------------------
// 失败处置策略
// ---------------------------------------------------------------------------

/// 处理失败时的应答策略
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    pub on_decode_failure: FailureAction,
    pub on_persist_failure: FailureAction,
    /// 重新入队前的等待时间
    pub requeue_delay: Duration,
}

impl From<&ConsumerConfig> for FailurePolicy {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            on_decode_failure: config.on_decode_failure,
            on_persist_failure: config.on_persist_failure,
            requeue_delay: Duration::from_millis(config.requeue_delay_ms),
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::from(&ConsumerConfig::default())
    }
}

impl FailurePolicy {
    /// 根据错误类型决定应答方式，失败的消息永远不会被确认
    pub fn disposition_for(&self, err: &NotificationError) -> Disposition {
        let action = match err {
            NotificationError::Decode(_) | NotificationError::Encode(_) => self.on_decode_failure,
            _ => self.on_persist_failure,
        };
        match action {
            FailureAction::Reject => Disposition::Reject,
            FailureAction::Requeue => Disposition::Requeue,
            FailureAction::Leave => Disposition::Leave,
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationConsumer
// ---------------------------------------------------------------------------

/// 通知消费者
///
/// 每次 `run` 对应一次完整的消费尝试：建立连接、声明队列、消费直到关闭或连接故障。
/// 可克隆，监督任务在故障后用克隆体重新发起消费。
#[derive(Clone)]
pub struct NotificationConsumer {
    amqp: AmqpConfig,
    store: Arc<dyn NotificationStore>,
    policy: FailurePolicy,
    tag_prefix: String,
}

impl NotificationConsumer {
    pub fn new(config: &AppConfig, store: Arc<dyn NotificationStore>) -> Self {
        Self {
            amqp: config.amqp.clone(),
            store,
            policy: FailurePolicy::from(&config.consumer),
            tag_prefix: config.service_name.clone(),
        }
    }

    /// 启动消费循环，直到收到 shutdown 信号
    ///
    /// 连接失败或投递流中断时返回 `NotificationError::Transport`。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        let consumer = AmqpConsumer::connect(&self.amqp)
            .await
            .map_err(NotificationError::Transport)?;

        info!(queue = %self.amqp.queue, "通知消费者已启动");

        let store = self.store.as_ref();
        let policy = &self.policy;
        let tag = consumer_tag(&self.tag_prefix);
        let handler_shutdown = shutdown.clone();

        consumer
            .start(&tag, shutdown, |msg| {
                let shutdown = handler_shutdown.clone();
                async move { handle_message(store, policy, &msg, &shutdown).await }
            })
            .await
            .map_err(NotificationError::Transport)?;

        info!("通知消费者已停止");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 单条消息处理
// ---------------------------------------------------------------------------

/// 解码并写入一条通知
///
/// 缺失字段按约定补齐默认值，不视为错误。
/// 写入前先编码为 BSON 文档，超出 BSON 表示范围的值（如大于 i64::MAX 的整数）
/// 返回 `NotificationError::Encode`，不会进入存储。
pub async fn process_message(
    store: &dyn NotificationStore,
    payload: &[u8],
) -> Result<InsertedNotification, NotificationError> {
    let event = NotificationEvent::from_slice(payload).map_err(NotificationError::Decode)?;
    let record = StoredNotification::from(event);
    mongodb::bson::to_document(&record).map_err(NotificationError::Encode)?;

    let start = Instant::now();
    let result = store.insert(&record).await;
    metrics::record_persist_duration(result.is_ok(), start.elapsed().as_secs_f64());

    let id = result.map_err(NotificationError::Persist)?;
    Ok(InsertedNotification { id, record })
}

/// 处理单条 RabbitMQ 通知消息，返回应答方式
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需 broker 连接。
/// 错误在此处记录日志并转换为应答方式，不会中断消费循环。
/// 重新入队前的等待会被关闭信号打断。
pub async fn handle_message(
    store: &dyn NotificationStore,
    policy: &FailurePolicy,
    msg: &ConsumerMessage,
    shutdown: &watch::Receiver<bool>,
) -> Disposition {
    let span = info_span!(
        "notification",
        delivery_tag = msg.delivery_tag,
        routing_key = %msg.routing_key,
        message_id = msg.message_id.as_deref(),
        redelivered = msg.redelivered,
    );
    set_parent_from_headers(&span, &msg.headers);

    async {
        let disposition = match process_message(store, &msg.payload).await {
            Ok(inserted) => {
                info!(
                    id = %inserted.id,
                    user = %inserted.record.user,
                    redelivered = msg.redelivered,
                    trace_id = ?current_trace_id(),
                    "通知已入库"
                );
                Disposition::Ack
            }
            Err(e) => {
                let disposition = policy.disposition_for(&e);
                match &e {
                    NotificationError::Decode(_) | NotificationError::Encode(_) => warn!(
                        error = %e,
                        payload = %msg.payload_lossy(),
                        disposition = disposition.as_str(),
                        "通知解码失败，消息未确认"
                    ),
                    _ => error!(
                        error = %e,
                        retryable = e.is_retryable(),
                        payload = %msg.payload_lossy(),
                        disposition = disposition.as_str(),
                        "通知写入失败，消息未确认"
                    ),
                }

                if disposition == Disposition::Requeue && !policy.requeue_delay.is_zero() {
                    let mut shutdown = shutdown.clone();
                    sleep_unless_shutdown(policy.requeue_delay, &mut shutdown).await;
                }
                disposition
            }
        };

        metrics::record_notification_consumed(disposition.as_str());
        disposition
    }
    .instrument(span)
    .await
}
