use async_trait::async_trait;

use crate::common::error::Result;

// ==========================================
// 记录后端接口 (RecordBackend) - 系统的身体
// ==========================================

/// 定时器记录后端接口
///
/// **职责**: 持久化定时器记录的原始字节。
/// **特点**:
/// - 实现灵活 (可以是嵌入式 KV、关系库的一张表、或测试用的内存 Map)。
/// - 序列化格式是核心自己的事，后端只见字节，对外格式稳定性不是目标。
/// - 调用可能阻塞在 IO 上；核心保证这不会阻塞无关定时器的派发。
#[async_trait]
pub trait RecordBackend: Send + Sync + 'static {
    /// 写入/覆盖一条记录
    async fn put(&self, id: &str, record: &[u8]) -> Result<()>;

    /// 按 ID 读取
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// 物理删除
    ///
    /// 删除不存在的 ID 不是错误。
    async fn delete(&self, id: &str) -> Result<()>;

    /// 全量扫描 (启动恢复用)
    ///
    /// 返回 (ID, 原始字节)。单条记录损坏由上层判定，后端只管搬运。
    async fn scan_all(&self) -> Result<Vec<(String, Vec<u8>)>>;
}
