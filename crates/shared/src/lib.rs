//! 共享库
//!
//! 包含通知摄取服务共用的配置、错误处理、MongoDB 连接、RabbitMQ 消费、可观测性等基础设施代码。

pub mod amqp;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod observability;
pub mod retry;
pub mod test_utils;
