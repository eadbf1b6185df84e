//! 通知服务错误类型
//!
//! 区分消息解码（含 BSON 编码）、持久化和 broker 传输三类故障，
//! 前两类按消息处置，传输故障结束本次消费交由监督任务重启。

use notify_shared::error::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知解码失败: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("通知无法编码为 BSON: {0}")]
    Encode(#[source] mongodb::bson::ser::Error),

    #[error("通知持久化失败: {0}")]
    Persist(#[source] NotifyError),

    #[error("消息队列传输失败: {0}")]
    Transport(#[source] NotifyError),

    #[error("HTTP 服务错误: {0}")]
    Server(#[from] std::io::Error),
}

impl NotificationError {
    /// 用于日志和指标标签的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Persist(_) => "persist",
            Self::Transport(_) => "transport",
            Self::Server(_) => "server",
        }
    }

    /// 存储或连接类故障，恢复后重新投递的消息可以成功处理
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persist(e) | Self::Transport(e) => e.is_retryable(),
            Self::Decode(_) | Self::Encode(_) | Self::Server(_) => false,
        }
    }
}
