//! 数据库连接管理模块
//!
//! 提供 MongoDB 客户端管理，支持健康检查和类型化的集合访问。
//! 客户端内部维护连接池，可跨任务共享。

use std::time::Duration;

use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{info, instrument};

use crate::config::MongoConfig;
use crate::error::{NotifyError, Result};

/// MongoDB 客户端包装
#[derive(Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// 创建客户端
    ///
    /// 驱动按需建立连接，此处只解析连接串并初始化连接池，
    /// 存储不可达不会阻止服务启动。
    #[instrument(skip(config), fields(database = %config.database))]
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        info!("Connecting to MongoDB...");

        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        let mut options = ClientOptions::parse(&config.url).await?;
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)?;
        let db = client.database(&config.database);

        info!("MongoDB client created");

        Ok(Self { db })
    }

    /// 获取类型化集合
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// 数据库名
    pub fn name(&self) -> &str {
        self.db.name()
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_: Document| ())
            .map_err(NotifyError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let config = MongoConfig {
            url: "mongodb://localhost:27017".to_string(),
            database: "notify_test".to_string(),
            ..Default::default()
        };
        let db = Database::connect(&config).await.unwrap();
        assert_eq!(db.name(), "notify_test");

        let collection = db.collection::<Document>("notifications");
        assert_eq!(collection.name(), "notifications");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let config = MongoConfig {
            url: "not-a-mongodb-url".to_string(),
            ..Default::default()
        };
        let err = Database::connect(&config).await.err().expect("连接串非法时应返回错误");
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    #[ignore] // 需要 MongoDB 连接
    async fn test_database_health_check() {
        let db = Database::connect(&MongoConfig::default()).await.unwrap();
        db.health_check().await.unwrap();
    }
}
