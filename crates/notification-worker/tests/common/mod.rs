//! 集成测试公共设施

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use notification_worker::store::NotificationStore;
use notify_shared::error::NotifyError;
use notify_shared::events::StoredNotification;

/// 内存存储，可切换为写入失败模式模拟存储不可用
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredNotification>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<StoredNotification> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, record: &StoredNotification) -> Result<String, NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Internal("store unavailable".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(format!("doc-{}", records.len()))
    }
}
