use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::common::config::InProgressPolicy;

// ==========================================
// 1. 结构化定时器事件 (TimerEvent)
// ==========================================

/// 定时器事件
///
/// §7 要求的统一上报通道：所有非致命状况 (跳过、重试、过期、加载异常)
/// 都走这一个结构化出口，由外部协作方决定如何渲染。核心自身绝不因
/// 其中任何一种状况终止进程。
#[derive(Debug, Clone, Serialize)]
pub enum TimerEvent {
    /// 定时器创建成功
    Created { id: String, owner: String },

    /// 定时器被显式取消
    Canceled { id: String },

    /// 计划走完，定时器过期
    Expired { id: String },

    /// 重叠跳过: 上一次触发还在事务中，本次到期被永久丢弃
    OverlapSkipped { id: String, due: DateTime<Utc> },

    /// 事务回滚后安排了一次重试
    RetryScheduled {
        id: String,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// 重试耗尽
    RetriesExhausted {
        id: String,
        attempts: u32,
        marked_failed: bool,
    },

    /// 目标不可用，本次到期被跳过，计划照常继续
    TargetUnavailable { id: String, owner: String },

    /// 表达式在搜索窗口内找不到任何到期，定时器创建即过期
    UnsatisfiableSchedule { id: String },

    /// 停机期间错过的到期，安排了一次补触发 (Catch-Up)
    CatchUpScheduled { id: String, missed: DateTime<Utc> },

    /// 加载时跳过了一条无法反序列化的记录
    CorruptRecordSkipped { id: String, reason: String },

    /// 加载到停机前处于 InProgress 的模糊记录
    AmbiguousInProgress { id: String, policy: InProgressPolicy },

    /// 调度器内部发起的持久化更新失败 (重试耗尽)
    /// 该定时器的内存状态与持久化状态已不一致，重启后以持久化状态为准。
    PersistenceFailure {
        id: String,
        op: &'static str,
        message: String,
    },

    /// 定时器进入 Failed 终态
    Failed { id: String, reason: String },
}

// ==========================================
// 2. 事件出口接口 (TimerEventSink)
// ==========================================

/// 事件出口接口
///
/// 外部管理面通过实现此 Trait 消费事件。实现必须快速返回，
/// 重活请自行转发到自己的通道里。
#[async_trait]
pub trait TimerEventSink: Send + Sync + 'static {
    async fn on_event(&self, event: TimerEvent);
}

// ==========================================
// 3. 默认实现
// ==========================================

/// 空出口 (No-Op)
pub struct NoOpSink;

#[async_trait]
impl TimerEventSink for NoOpSink {
    async fn on_event(&self, _event: TimerEvent) {}
}

/// 默认出口: 按严重程度落到 tracing 日志
pub struct TracingEventSink;

#[async_trait]
impl TimerEventSink for TracingEventSink {
    async fn on_event(&self, event: TimerEvent) {
        match &event {
            TimerEvent::PersistenceFailure { id, op, message } => {
                error!("[Timer-{}] Persistence {} failed permanently: {}", id, op, message);
            }
            TimerEvent::Failed { id, reason } => {
                error!("[Timer-{}] Marked failed: {}", id, reason);
            }
            TimerEvent::RetriesExhausted { id, attempts, .. } => {
                warn!("[Timer-{}] Retries exhausted after {} attempts.", id, attempts);
            }
            TimerEvent::OverlapSkipped { id, due } => {
                warn!("[Timer-{}] Occurrence at {} skipped (previous still in progress).", id, due);
            }
            TimerEvent::TargetUnavailable { id, owner } => {
                warn!("[Timer-{}] Target {} unavailable, occurrence skipped.", id, owner);
            }
            TimerEvent::UnsatisfiableSchedule { id } => {
                warn!("[Timer-{}] Schedule has no future occurrence, expiring immediately.", id);
            }
            TimerEvent::CorruptRecordSkipped { id, reason } => {
                warn!("[Timer-{}] Skipped corrupt record on load: {}", id, reason);
            }
            TimerEvent::AmbiguousInProgress { id, policy } => {
                warn!("[Timer-{}] Loaded in-progress record from unclean shutdown, applying {:?}.", id, policy);
            }
            other => {
                debug!("Timer event: {:?}", other);
            }
        }
    }
}
