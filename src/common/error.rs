use thiserror::Error;

use crate::schedule::ScheduleParseError;

/// 定时器服务统一结果类型
///
/// 使用此别名可以简化函数签名：`fn do_something() -> Result<()>`
pub type Result<T> = std::result::Result<T, TimerError>;

#[derive(Error, Debug)]
pub enum TimerError {
    // ==========================================
    // 1. 基础配置与启动错误 (Configuration & Startup)
    // ==========================================
    /// 配置错误
    ///
    /// - 触发场景: 参数校验不通过，或者逻辑上互斥的配置项被同时启用。
    /// - 后果: 服务启动失败。
    #[error("Configuration error: {0}")]
    Config(String),

    /// 服务已停机
    ///
    /// - 触发场景: 在调用 `shutdown()` 之后仍有调用方尝试创建新定时器。
    /// - 后果: 请求被拒绝。
    #[error("Timer service is stopping, rejecting new timers.")]
    ServiceShutdown,

    // ==========================================
    // 2. 校验错误 (Validation)
    // ==========================================
    /// 日历表达式无效
    ///
    /// - 触发场景: 创建日历定时器时，某个字段无法解析、超出范围或解析结果为空集。
    /// - 内部错误会指明具体是哪个字段、哪个 Token 出了问题。
    #[error("Invalid calendar expression: {0}")]
    InvalidSchedule(#[from] ScheduleParseError),

    /// 非法参数
    ///
    /// - 触发场景: 间隔为零的循环定时器、空的 Owner 标识等。
    /// - 后果: `create_timer` 同步返回错误，不会创建任何记录。
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ==========================================
    // 3. 基础设施与 IO 错误 (Infrastructure & IO)
    // ==========================================
    /// 序列化/反序列化失败
    ///
    /// - 触发场景: 存储里的 JSON 格式损坏，或者代码版本升级导致结构体不兼容。
    /// - 处理: 加载阶段遇到时跳过该条记录并上报事件，绝不中断整体加载。
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 通用 IO 错误
    ///
    /// - 触发场景: 后端读写文件失败、网络 Socket 断开等。
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// 持久化层失败 (重试耗尽后)
    ///
    /// - 触发场景: 后端连续 N 次写入/删除失败。
    /// - 后果: 对调用方发起的变更 (`create_timer`/`cancel_timer`) 直接上抛；
    ///   对调度器自身发起的变更 (触发后重新武装) 记录为该定时器的致命状况并上报事件。
    #[error("Persistence {op} failed for timer {timer_id} after {attempts} attempts: {message}")]
    Persistence {
        op: &'static str,
        timer_id: String,
        attempts: u32,
        message: String,
    },

    // ==========================================
    // 4. 调度逻辑与执行错误 (Scheduling & Execution)
    // ==========================================
    /// 定时器不存在
    ///
    /// - 触发场景: 查询一个已经被删除或从未存在的定时器 ID。
    /// - 注意: `cancel_timer` 是幂等的，取消不存在的定时器不会返回此错误。
    #[error("Timer {0} not found.")]
    TimerNotFound(String),

    /// 目标不可用
    ///
    /// - 触发场景: 定时器的 Owner 组件已被卸载，注册表里找不到回调。
    /// - 处理: 调度路径上这是"跳过本次触发"，不是错误；此变体供宿主
    ///   在同步包装 API 里使用。
    #[error("Timeout target {0} is not registered.")]
    TargetUnavailable(String),
}

impl TimerError {
    /// 判断该错误是否值得重试 (Retryable)
    ///
    /// 区分 "暂时性故障" 和 "永久性故障"：
    /// - 返回 `true`: IO 抖动、持久化暂时失败等，退避后重试有意义。
    /// - 返回 `false`: 表达式写错了、数据损坏、服务停机等，重试也没用。
    pub fn is_retryable(&self) -> bool {
        match self {
            // IO 错误 (网络超时、文件被占用) -> 重试
            TimerError::Io(_) => true,

            // 持久化失败：这里已经是"重试耗尽"的产物，但换个时间窗口仍可能恢复
            TimerError::Persistence { .. } => true,

            // 配置和校验错误 -> 重试也没用
            TimerError::Config(_) => false,
            TimerError::InvalidSchedule(_) => false,
            TimerError::InvalidArgument(_) => false,

            // 数据坏了 (JSON 解析失败) -> 毒丸
            TimerError::Serialization(_) => false,

            // 逻辑错误
            TimerError::TimerNotFound(_) => false,
            TimerError::TargetUnavailable(_) => false,

            // 系统关闭 -> 没必要重试了
            TimerError::ServiceShutdown => false,
        }
    }
}
