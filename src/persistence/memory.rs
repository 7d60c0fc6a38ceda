use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::common::error::Result;
use crate::persistence::traits::RecordBackend;

/// 内存后端实现 (In-Memory Backend)
///
/// - DashMap: 分片锁，高并发读写不排队。
/// - 进程退出即丢失，所以它"持久"的范围只到同进程内的服务重建；
///   测试里用它验证加载/恢复路径 (两个服务实例共享同一个后端)。
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存量 (测试辅助)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Clone 实现：内部是 Arc，Clone 是廉价的，且两个句柄共享数据
impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn put(&self, id: &str, record: &[u8]) -> Result<()> {
        self.data.insert(id.to_string(), record.to_vec());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(id).map(|v| v.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.data.remove(id);
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
