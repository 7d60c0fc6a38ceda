use serde::{Deserialize, Serialize};

// ==========================================
// 1. 资源配置 (WorkerConfig)
// ==========================================

/// 执行池与并发控制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 全局最大并发触发数
    ///
    /// - 说明: 限制同时处于事务中的回调数量。不同 ID 的触发并行执行，
    ///   同一 ID 由状态机串行化，与此上限无关。
    /// - 默认值: 逻辑核心数 * 2
    pub max_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get() * 2,
        }
    }
}

// ==========================================
// 2. 重试配置 (RetryConfig)
// ==========================================

/// 重试耗尽后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustedAction {
    /// 回到常规计划: 放弃本次到期，等下一次日历/间隔到期，重试窗口清零
    RevertToSchedule,
    /// 标记失败: 定时器进入 Failed 终态，等待管理方介入
    MarkFailed,
}

/// 事务回滚后的重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大重试次数
    ///
    /// - 说明: 同一次到期允许的失败重试次数，成功后计数归零。
    /// - 默认值: 3
    pub max_attempts: u32,

    /// 退避基础延迟 (毫秒)
    ///
    /// - 说明: 第 N 次重试前等待约 `base * 2^(N-1)`，带全抖动。
    /// - 默认值: 1000 ms
    pub base_delay_ms: u64,

    /// 退避封顶延迟 (毫秒)
    ///
    /// - 默认值: 60,000 ms (1分钟)
    pub max_delay_ms: u64,

    /// 重试耗尽后的处置
    ///
    /// - 默认值: RevertToSchedule
    pub exhausted: ExhaustedAction,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exhausted: ExhaustedAction::RevertToSchedule,
        }
    }
}

// ==========================================
// 3. 持久化配置 (StoreConfig)
// ==========================================

/// 持久化层容错配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 单次写入/删除的最大尝试次数
    ///
    /// - 说明: 后端抖动时在存储层内部重试，耗尽后才把错误上抛。
    /// - 默认值: 3
    pub write_attempts: u32,

    /// 两次尝试之间的间隔 (毫秒)
    ///
    /// - 默认值: 100 ms
    pub write_retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_attempts: 3,
            write_retry_delay_ms: 100,
        }
    }
}

// ==========================================
// 4. 恢复配置 (RecoveryConfig)
// ==========================================

/// 启动加载时，对停机前处于 InProgress 状态记录的处置
///
/// 这类记录是"模糊的"：事务可能已提交也可能没有。两种策略都会上报
/// AmbiguousInProgress 事件，绝不会静默当作什么都没发生。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InProgressPolicy {
    /// 当作一次失败的尝试，立即进入重试 (可能造成重复执行)
    RetryImmediately,
    /// 标记 Failed，等待管理方人工裁决 (可能丢失一次执行)
    FlagOnly,
}

/// 重启恢复配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// InProgress 记录的处置策略
    ///
    /// - 默认值: RetryImmediately
    pub in_progress: InProgressPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            in_progress: InProgressPolicy::RetryImmediately,
        }
    }
}

// ==========================================
// 5. 总配置入口 (TimerServiceConfig)
// ==========================================

/// 定时器服务总配置
///
/// 使用分层结构组织配置项。支持 `serde` 序列化，可直接从 YAML/JSON 加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerServiceConfig {
    /// 执行池与并发
    #[serde(default)]
    pub worker: WorkerConfig,

    /// 回滚重试
    #[serde(default)]
    pub retry: RetryConfig,

    /// 持久化容错
    #[serde(default)]
    pub store: StoreConfig,

    /// 重启恢复
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// 日历前向搜索窗口 (年)
    ///
    /// - 说明: 在这个窗口内找不到任何到期的表达式被判定为"不可满足"，
    ///   定时器直接过期并上报警告 (例如 2 月 31 日这类永不出现的日期)。
    /// - 默认值: 5
    #[serde(default = "default_lookahead_years")]
    pub lookahead_years: u32,
}

fn default_lookahead_years() -> u32 {
    5
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
            recovery: RecoveryConfig::default(),
            lookahead_years: default_lookahead_years(),
        }
    }
}

impl TimerServiceConfig {
    /// 快速创建一个开发/测试环境配置
    pub fn new_dev() -> Self {
        let mut cfg = Self::default();
        // 测试环境下退避快一点，方便断言
        cfg.retry.base_delay_ms = 20;
        cfg.retry.max_delay_ms = 100;
        cfg.store.write_retry_delay_ms = 10;
        cfg
    }
}
