//! 通知工作者服务
//!
//! 从 RabbitMQ 消费通知事件并写入 MongoDB，同时提供存活探针。
//! 消费任务由监督者在独立任务中运行，故障后按退避策略重启。

pub mod consumer;
pub mod error;
pub mod health;
pub mod store;
pub mod supervisor;
