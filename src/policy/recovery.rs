use crate::common::config::{InProgressPolicy, RecoveryConfig};

/// 加载恢复时对单条记录的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 当作一次失败的尝试，立即进入重试
    RetryNow,
    /// 标记 Failed，留给管理方裁决
    MarkFailed,
}

/// 重启恢复策略
///
/// 停机前处于 InProgress 的记录是模糊的：事务可能已提交也可能没有，
/// 两种处置各有代价 (重复执行 vs 丢失执行)。这里不做猜测，只忠实
/// 执行配置里写明的那一种，并由调用方上报 AmbiguousInProgress 事件。
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// 停机前 InProgress 记录的处置
    pub fn on_in_progress(&self) -> RecoveryAction {
        match self.config.in_progress {
            InProgressPolicy::RetryImmediately => RecoveryAction::RetryNow,
            InProgressPolicy::FlagOnly => RecoveryAction::MarkFailed,
        }
    }

    pub fn policy(&self) -> InProgressPolicy {
        self.config.in_progress
    }
}
