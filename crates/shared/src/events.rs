//! 通知事件模型
//!
//! 定义队列中流转的通知事件以及落库后的存储记录。
//! 三个字段都是可选的：上游生产者可能只填写部分字段，消费端按约定补齐默认值，
//! 缺失字段不视为错误。字段值不做类型校验，原样入库。

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 缺少 user 字段时使用的占位用户标识
pub const UNKNOWN_USER: &str = "unknown";

/// 队列中的通知事件
///
/// 显式的 `null` 与字段缺失等价；未知字段忽略。
/// 三个字段都按任意 JSON 值接收，`{"message": 42}` 同样入库。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotificationEvent {
    pub message: Option<Value>,
    pub user: Option<Value>,
    /// 原样透传，不解析格式
    pub timestamp: Option<Value>,
}

impl NotificationEvent {
    /// 从原始消息体解码
    ///
    /// 消息体必须是 JSON 对象。先解析为 `Value` 再反序列化，
    /// 避免 serde 把 JSON 数组按位置映射到结构体字段。
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<Value>(payload)? {
            Value::Object(map) => serde_json::from_value(Value::Object(map)),
            other => Err(serde_json::Error::custom(format!(
                "期望 JSON 对象，实际为 {}",
                json_type_name(&other)
            ))),
        }
    }
}

/// 落库的通知记录
///
/// 每条消息对应一个文档，文档 ID 由存储端分配。
/// `timestamp` 缺失时写入 null 而不是省略字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNotification {
    pub message: Value,
    pub user: Value,
    pub timestamp: Option<Value>,
}

impl From<NotificationEvent> for StoredNotification {
    fn from(event: NotificationEvent) -> Self {
        Self {
            message: event
                .message
                .unwrap_or_else(|| Value::String(String::new())),
            user: event
                .user
                .unwrap_or_else(|| Value::String(UNKNOWN_USER.to_string())),
            timestamp: event.timestamp,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
