use chrono::{DateTime, Utc};

use crate::common::config::{ExhaustedAction, RetryConfig};
use crate::common::utils::calculate_backoff;
use std::time::Duration;

/// 回滚后的重试决策 (The Decision)
///
/// - 策略层返回给调度器的具体行动指令，用数据表达，不抛异常。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// [重试] 在 `at` 时刻发起第 `attempt` 次重试
    ///
    /// - 重试到期独立于日历计划，并且优先于下一次常规到期。
    /// - 重试期间同 ID 的常规到期被抑制 (Single-Flight)。
    RetryAt { attempt: u32, at: DateTime<Utc> },

    /// [放弃本次] 重试耗尽，回到常规计划等下一次到期
    ///
    /// - 重试窗口清零，下一次常规到期拥有全新的重试预算。
    Revert,

    /// [彻底放弃] 重试耗尽，定时器进入 Failed 终态
    ///
    /// - 需要管理方介入；失败必须上报，绝不静默丢弃。
    GiveUp,
}

/// 事务回滚重试策略
///
/// 核心职责：把 "第 N 次失败" 翻译成 "什么时候再试 / 要不要放弃"。
/// 退避使用带全抖动的指数算法，防止一批同时失败的定时器在同一
/// 时刻集体重试。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 事务回滚后的决策
    ///
    /// # 参数
    /// - `attempts`: 含本次在内的累计失败次数 (1, 2, 3...)。
    /// - `now`: 当前时间。
    pub fn on_rollback(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts <= self.config.max_attempts {
            let delay = calculate_backoff(
                attempts,
                Duration::from_millis(self.config.base_delay_ms),
                Duration::from_millis(self.config.max_delay_ms),
            );
            let at = now
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::milliseconds(10));
            return RetryDecision::RetryAt { attempt: attempts, at };
        }

        match self.config.exhausted {
            ExhaustedAction::RevertToSchedule => RetryDecision::Revert,
            ExhaustedAction::MarkFailed => RetryDecision::GiveUp,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}
