use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::common::TimeUtils;

/// 派发起搏器
///
/// 核心职责：驱动派发循环的节奏。
/// 根据最早的到期时间，决定是立刻派发、睡到那个时刻、还是挂起等通知。
/// 同时承担两个闸门：停机信号和挂起 (Suspension) 覆盖层。
pub struct DispatchPacemaker<'a> {
    /// 挂起原子
    /// true 期间到期的触发被推迟 (不是跳过)，恢复后统一派发。
    suspended: &'a AtomicBool,

    /// 通知
    /// 新记录入队、取消、恢复挂起都会触发它，让循环重新评估最早到期。
    notify: &'a Notify,

    /// 关机信号
    shutdown: &'a CancellationToken,
}

impl<'a> DispatchPacemaker<'a> {
    pub fn new(
        suspended: &'a AtomicBool,
        notify: &'a Notify,
        shutdown: &'a CancellationToken,
    ) -> Self {
        Self {
            suspended,
            notify,
            shutdown,
        }
    }

    /// 等待下一次动作触发
    ///
    /// # 参数
    /// - `next_due_millis`: 队列里最早的到期时刻；None 表示队列为空。
    pub async fn wait_until(&mut self, next_due_millis: Option<i64>) -> PacemakerEvent {
        loop {
            // 1. 检查 Shutdown (非阻塞)
            if self.shutdown.is_cancelled() {
                return PacemakerEvent::Shutdown;
            }

            // 2. 检查挂起覆盖层: 挂起期间不派发，只等恢复或停机
            if self.suspended.load(Ordering::Acquire) {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return PacemakerEvent::Shutdown,
                    _ = self.notify.notified() => continue,
                }
            }

            match next_due_millis {
                // 队列为空: 死等，直到有新记录入队
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return PacemakerEvent::Shutdown,
                        _ = self.notify.notified() => return PacemakerEvent::Trigger,
                    }
                }
                Some(due) => {
                    let now = TimeUtils::now_millis();
                    if due <= now {
                        return PacemakerEvent::Trigger;
                    }
                    // 软等待: 睡到最早到期，但队列变化会提前叫醒我们重新评估
                    let deadline =
                        Instant::now() + Duration::from_millis((due - now) as u64);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return PacemakerEvent::Shutdown,
                        _ = self.notify.notified() => return PacemakerEvent::Trigger,
                        _ = sleep_until(deadline) => return PacemakerEvent::Trigger,
                    }
                }
            }
        }
    }
}

/// 起搏器产生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacemakerEvent {
    /// [触发] 有到期或队列发生了变化，请重新评估并派发
    Trigger,
    /// [关闭] 系统停机
    Shutdown,
}
