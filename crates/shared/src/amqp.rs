//! RabbitMQ 基础设施封装
//!
//! 将 lapin 的底层 API 封装为业务友好的 Consumer 抽象，
//! 统一队列声明、预取控制、消息应答和优雅关闭语义。

use std::borrow::Cow;
use std::collections::HashMap;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::AmqpConfig;
use crate::error::NotifyError;

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// 单条消息处理完成后对 broker 的应答方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// basic.ack，消息从队列永久移除
    Ack,
    /// basic.reject(requeue=false)
    Reject,
    /// basic.nack(requeue=true)
    Requeue,
    /// 不应答，消息保持 unacked
    Leave,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Reject => "reject",
            Self::Requeue => "requeue",
            Self::Leave => "leave",
        }
    }
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 RabbitMQ 消息的统一表示
///
/// 从 lapin 的 `Delivery` 中提取拥有所有权的字段，应答句柄留在消费循环内部，
/// 处理函数只能通过返回 `Disposition` 决定应答方式。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub delivery_tag: u64,
    pub routing_key: String,
    /// broker 标记的重复投递，同一消息可能已被处理过
    pub redelivered: bool,
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    /// 仅保留字符串类型的消息头
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_delivery(delivery: &Delivery) -> Self {
        let mut headers = HashMap::new();
        if let Some(table) = delivery.properties.headers() {
            for (key, value) in table.inner() {
                if let Some(value) = header_value_to_string(value) {
                    headers.insert(key.as_str().to_string(), value);
                }
            }
        }

        Self {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            payload: delivery.data.clone(),
            headers,
        }
    }

    /// 负载的有损 UTF-8 表示，用于日志中还原原始消息
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

fn header_value_to_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

/// 生成消费者标签：`{prefix}-{uuid}`，便于在管理界面区分实例
pub fn consumer_tag(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// AmqpConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 RabbitMQ 消费者
///
/// 持有连接与通道，提供基于 `watch` channel 的优雅关闭语义。
/// 一个实例对应一次消费尝试：连接断开后由上层重新创建。
pub struct AmqpConsumer {
    connection: Connection,
    channel: Channel,
    queue: String,
}

impl AmqpConsumer {
    /// 建立连接、创建通道、设置预取并声明队列
    pub async fn connect(config: &AmqpConfig) -> Result<Self, NotifyError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| NotifyError::Amqp(format!("连接 RabbitMQ 失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| NotifyError::Amqp(format!("创建通道失败: {e}")))?;

        if config.prefetch_count > 0 {
            channel
                .basic_qos(config.prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| NotifyError::Amqp(format!("设置预取数量失败: {e}")))?;
        }

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: config.durable,
                    ..QueueDeclareOptions::default()
                },
                queue_arguments(config),
            )
            .await
            .map_err(|e| NotifyError::Amqp(format!("声明队列 {} 失败: {e}", config.queue)))?;

        info!(
            queue = %config.queue,
            durable = config.durable,
            prefetch_count = config.prefetch_count,
            dead_letter_exchange = ?config.dead_letter_exchange,
            "RabbitMQ 消费者已初始化"
        );

        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
        })
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听投递流和关闭信号：
    /// - 收到消息时调用 handler 处理，并按返回的 `Disposition` 应答；
    ///   消息逐条串行处理，handler 完成前不会拉取下一条。
    /// - 关闭信号变为 `true` 时退出循环并返回 Ok，正在执行的 handler 会自然完成。
    /// - 投递流结束、接收出错或应答失败说明连接已不可用，返回 Err 交由上层重建。
    pub async fn start<F, Fut>(
        self,
        consumer_tag: &str,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), NotifyError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Disposition>,
    {
        if *shutdown.borrow() {
            self.close().await;
            return Ok(());
        }

        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifyError::Amqp(format!("订阅队列 {} 失败: {e}", self.queue)))?;
        futures::pin_mut!(consumer);

        info!(queue = %self.queue, consumer_tag, "RabbitMQ 消费循环已启动");

        let result = loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，RabbitMQ 消费循环退出");
                        break Ok(());
                    }
                }

                delivery = consumer.next() => {
                    let Some(delivery) = delivery else {
                        warn!(queue = %self.queue, "RabbitMQ 投递流意外结束");
                        break Err(NotifyError::Amqp("投递流意外结束".to_string()));
                    };

                    let delivery = match delivery {
                        Ok(delivery) => delivery,
                        Err(e) => {
                            error!(error = %e, "接收 RabbitMQ 消息出错");
                            break Err(e.into());
                        }
                    };

                    let msg = ConsumerMessage::from_delivery(&delivery);
                    debug!(
                        delivery_tag = msg.delivery_tag,
                        routing_key = %msg.routing_key,
                        redelivered = msg.redelivered,
                        "收到 RabbitMQ 消息"
                    );

                    let disposition = handler(msg).await;
                    if let Err(e) = settle(&delivery, disposition).await {
                        error!(
                            error = %e,
                            delivery_tag = delivery.delivery_tag,
                            disposition = disposition.as_str(),
                            "消息应答失败"
                        );
                        break Err(e);
                    }
                }
            }
        };

        self.close().await;
        result
    }

    /// 关闭通道和连接，连接已断开时只记录日志
    async fn close(self) {
        if let Err(e) = self.channel.close(200, "consumer shutdown").await {
            debug!(error = %e, "关闭 RabbitMQ 通道失败");
        }
        if let Err(e) = self.connection.close(200, "consumer shutdown").await {
            debug!(error = %e, "关闭 RabbitMQ 连接失败");
        }
    }
}

fn queue_arguments(config: &AmqpConfig) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(exchange) = &config.dead_letter_exchange {
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(exchange.as_str().into()),
        );
    }
    arguments
}

async fn settle(delivery: &Delivery, disposition: Disposition) -> Result<(), NotifyError> {
    match disposition {
        Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await?,
        Disposition::Reject => {
            delivery
                .acker
                .reject(BasicRejectOptions { requeue: false })
                .await?
        }
        Disposition::Requeue => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await?
        }
        Disposition::Leave => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
