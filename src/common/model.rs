use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::{TimeUtils, new_timer_id};
use crate::schedule::CalendarExpression;

// ==========================================
// 1. 定时器状态枚举 (TimerState)
// ==========================================

/// 定时器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    /// 已创建
    /// - 记录刚刚构建完成，还没有进入调度索引。
    Created,

    /// 活跃
    /// - 定时器已武装，等待 `next_timeout` 到期被派发。
    Active,

    /// 触发中
    /// - 本次到期已交给执行器，事务尚未结束。
    /// - 处于此状态时，同一定时器新到期的触发会被跳过 (Overlap Skip)，
    ///   保证同一 ID 永远不会并发执行 (Single-Flight)。
    InProgress,

    /// 等待重试
    /// - 上一次触发因事务回滚失败，退避计时中。
    /// - 重试触发独立于日历计划，且优先于下一次常规到期。
    RetryWait,

    /// 已过期
    /// - 计划再也不会产生新的到期 (一次性定时器已触发，或日历表达式已走完)。
    Expired,

    /// 已取消
    /// - 调用方显式取消。取消一个正在触发中的定时器不会打断事务，
    ///   但会阻止之后的任何到期。
    Canceled,

    /// 已失败
    /// - 重试耗尽且策略为 MarkFailed，或回调声明了不可恢复错误。
    /// - 需要管理方介入，不再参与调度。
    Failed,
}

impl TimerState {
    /// 状态是否是终态（不可流转）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TimerState::Expired | TimerState::Canceled | TimerState::Failed
        )
    }
}

// ==========================================
// 2. 调度计划 (Schedule)
// ==========================================

/// 定时器调度计划
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Schedule {
    /// 日历定时器 (Calendar)
    /// 遵循日历表达式周期性触发，支持时区与起止边界。
    Calendar(CalendarExpression),

    /// 间隔定时器 (Interval)
    /// 首次在 `initial_delay` 之后触发，之后每隔 `every` 触发一次。
    Interval {
        initial_delay: Duration,
        every: Duration,
    },

    /// 单次定时器 (Single Action)
    /// 在指定时刻触发一次。过去的时刻会立即触发一次后过期。
    At(DateTime<Utc>),
}

impl Schedule {
    /// 计划是否是循环的 (触发后还有下一次)
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::At(_))
    }
}

// ==========================================
// 3. 重试状态 (RetryState)
// ==========================================

/// 嵌入在 TimerRecord 中的重试状态
///
/// 不变量: 触发成功后 `attempts` 归零。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    /// 已失败的尝试次数
    pub attempts: u32,

    /// 最后一次失败的时间
    pub last_failure: Option<DateTime<Utc>>,
}

impl RetryState {
    /// 记录一次失败
    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.attempts += 1;
        self.last_failure = Some(at);
    }

    /// 成功后清零
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }
}

// ==========================================
// 4. 核心定时器数据 (TimerRecord)
// ==========================================

/// 定时器记录
///
/// - 这是在 Service, Store, Scheduler 和 Invoker 之间流转的核心数据包。
/// - 持久化定时器的完整状态都在这里，重启后靠它恢复调度。
///
/// 不变量:
/// - `next_timeout` 永远是与计划和当前状态一致的、最早的未触发到期；
/// - 终态 (`Canceled`/`Expired`) 的记录 `next_timeout == None`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerRecord {
    // --- 基础标识 ---
    /// 全局唯一的定时器 ID (NanoID)
    pub id: String,

    /// 所属目标组件的标识
    /// 回调通过它在注册表里查找；卸载该目标会让触发被跳过。
    pub owner: String,

    // --- 调度控制 ---
    /// 调度计划
    pub schedule: Schedule,

    /// 下一次到期时间
    /// None = 已过期/不再有到期。
    pub next_timeout: Option<DateTime<Utc>>,

    /// 上一次成功派发的到期时间
    /// 间隔定时器用它推算下一次 (`last_fire + every`)。
    pub last_fire: Option<DateTime<Utc>>,

    // --- 状态与持久化 ---
    /// 当前状态
    pub state: TimerState,

    /// 是否持久化
    /// false = 仅存在于内存，进程重启即丢失。
    pub persistent: bool,

    /// 重试状态
    #[serde(default)]
    pub retry: RetryState,

    // --- 载荷与时间戳 ---
    /// 调用方提供的不透明载荷，触发时原样传给回调
    #[serde(default)]
    pub info: Vec<u8>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
}

impl TimerRecord {
    /// 创建一条新记录
    ///
    /// 注意: `next_timeout` 此时还是 None，由门面在入库前计算首次到期。
    pub fn new(owner: impl Into<String>, schedule: Schedule, info: Vec<u8>, persistent: bool) -> Self {
        let now = TimeUtils::now();
        Self {
            id: new_timer_id(),
            owner: owner.into(),
            schedule,
            next_timeout: None,
            last_fire: None,
            state: TimerState::Created,
            persistent,
            retry: RetryState::default(),
            info,
            created_at: now,
            updated_at: now,
        }
    }

    /// 更新最后活动时间
    pub fn touch(&mut self) {
        self.updated_at = TimeUtils::now();
    }

    /// 标记为触发中
    ///
    /// 派发循环在把记录交给执行器之前调用，之后同 ID 的新到期都会被跳过。
    pub fn mark_in_progress(&mut self) {
        self.state = TimerState::InProgress;
        self.touch();
    }

    /// 进入终态，清掉到期时间以维持不变量
    pub fn mark_terminal(&mut self, state: TimerState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.next_timeout = None;
        self.touch();
    }
}

// ==========================================
// 5. 管理快照 (TimerSnapshot)
// ==========================================

/// 只读管理快照
///
/// 供外部管理面板渲染，绝不是活视图。
#[derive(Debug, Clone, Serialize)]
pub struct TimerSnapshot {
    pub id: String,
    pub owner: String,
    pub state: TimerState,
    pub next_timeout: Option<DateTime<Utc>>,
    pub persistent: bool,
    pub retry_attempts: u32,
}

impl From<&TimerRecord> for TimerSnapshot {
    fn from(rec: &TimerRecord) -> Self {
        Self {
            id: rec.id.clone(),
            owner: rec.owner.clone(),
            state: rec.state,
            next_timeout: rec.next_timeout,
            persistent: rec.persistent,
            retry_attempts: rec.retry.attempts,
        }
    }
}
