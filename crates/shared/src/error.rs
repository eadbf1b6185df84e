//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum NotifyError {
    // ==================== 存储错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] mongodb::error::Error),

    // ==================== 消息队列错误 ====================
    #[error("AMQP 错误: {0}")]
    Amqp(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Amqp(_) => "AMQP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 连接类故障在重新建立连接或 broker 重新投递后可能恢复；
    /// 配置错误重试也不会改变结果。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Amqp(_))
    }
}

impl From<lapin::Error> for NotifyError {
    fn from(err: lapin::Error) -> Self {
        Self::Amqp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = NotifyError::Amqp("connection reset".to_string());
        assert_eq!(err.code(), "AMQP_ERROR");

        let err = NotifyError::Internal("bug".to_string());
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        assert!(NotifyError::Amqp("channel closed".to_string()).is_retryable());
        assert!(!NotifyError::Internal("bug".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = NotifyError::Amqp("broker 不可达".to_string());
        assert_eq!(err.to_string(), "AMQP 错误: broker 不可达");
    }

    #[test]
    fn test_from_config_error() {
        let err: NotifyError = config::ConfigError::Message("missing key".to_string()).into();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(!err.is_retryable());
    }
}
