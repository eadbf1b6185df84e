//! 通知存储
//!
//! 通过 `NotificationStore` trait 抽象写入行为，消费管道只依赖该抽象，
//! 测试中可替换为 mock 或内存实现。

use async_trait::async_trait;
use mongodb::Collection;
use mongodb::bson::Bson;
use notify_shared::database::Database;
use notify_shared::error::NotifyError;
use notify_shared::events::StoredNotification;
use tracing::debug;

/// 成功入库的通知
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedNotification {
    /// 存储端分配的文档 ID
    pub id: String,
    pub record: StoredNotification,
}

/// 通知存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 写入一条记录，返回存储端分配的文档 ID
    ///
    /// 非事务、无幂等键：同一消息重复投递会产生多条记录。
    async fn insert(&self, record: &StoredNotification) -> Result<String, NotifyError>;
}

/// MongoDB 实现
pub struct MongoNotificationStore {
    collection: Collection<StoredNotification>,
}

impl MongoNotificationStore {
    pub fn new(db: &Database, collection: &str) -> Self {
        Self {
            collection: db.collection(collection),
        }
    }
}

#[async_trait]
impl NotificationStore for MongoNotificationStore {
    async fn insert(&self, record: &StoredNotification) -> Result<String, NotifyError> {
        let result = self.collection.insert_one(record).await?;
        let id = match result.inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        };
        debug!(id = %id, collection = %self.collection.name(), "通知文档已写入");
        Ok(id)
    }
}
