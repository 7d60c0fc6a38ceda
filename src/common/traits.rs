use async_trait::async_trait;

// ==========================================
// 1. 超时回调接口 (TimeoutHandler)
// ==========================================

/// 回调失败的显式分类
///
/// 用数据而不是异常控制流来区分"可重试"和"不可恢复"：
/// - `Retryable`: 事务回滚，按退避策略重试 (业务抛错、下游超时等)。
/// - `Fatal`: 事务回滚，定时器直接进入 Failed，不再重试 (数据永久损坏等)。
#[derive(Debug)]
pub enum CallbackError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl CallbackError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        CallbackError::Retryable(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        CallbackError::Fatal(err.into())
    }
}

// 默认转换: 未分类的错误一律按可重试处理
impl From<anyhow::Error> for CallbackError {
    fn from(err: anyhow::Error) -> Self {
        CallbackError::Retryable(err)
    }
}

/// 超时回调接口
///
/// # 设计哲学
/// 这是唯一的、归一化的回调形状：`(timer_id, info) -> result`。
/// 方法签名适配 (反射、多参数形状等) 由注册回调的外部协作方完成，
/// 核心永远不检查回调的签名。
///
/// 回调在执行器开启的事务边界内运行；返回 `Err` 会导致事务回滚。
#[async_trait]
pub trait TimeoutHandler: Send + Sync + 'static {
    /// 执行一次超时回调
    ///
    /// # 参数
    /// - `timer_id`: 触发的定时器 ID。
    /// - `info`: 创建定时器时提供的不透明载荷，原样传入。
    async fn on_timeout(&self, timer_id: &str, info: &[u8]) -> Result<(), CallbackError>;
}

// ==========================================
// 2. 事务边界接口 (TransactionBoundary)
// ==========================================

/// 事务边界接口
///
/// **职责**: 核心不启动事务管理器，只通过这个接口对每次触发做
/// begin/commit/rollback 划界。真正的事务管理器由协作方注入。
#[async_trait]
pub trait TransactionBoundary: Send + Sync + 'static {
    /// 开启一个新事务
    ///
    /// 返回的句柄必须被 commit 或 rollback 恰好一次。
    async fn begin(&self) -> anyhow::Result<Box<dyn TransactionHandle>>;
}

/// 单个进行中事务的句柄
#[async_trait]
pub trait TransactionHandle: Send {
    /// 提交事务
    ///
    /// 提交失败等价于回滚 (执行器会按回滚处理本次触发)。
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    /// 回滚事务
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

// ==========================================
// 3. 默认实现 (No-Op)
// ==========================================

/// 空事务边界
///
/// 用于测试，或者宿主不提供事务语义的部署形态。
pub struct NoTransaction;

struct NoTransactionHandle;

#[async_trait]
impl TransactionBoundary for NoTransaction {
    async fn begin(&self) -> anyhow::Result<Box<dyn TransactionHandle>> {
        Ok(Box::new(NoTransactionHandle))
    }
}

#[async_trait]
impl TransactionHandle for NoTransactionHandle {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}
