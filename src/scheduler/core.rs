use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::common::{
    TimeUtils, TimerEvent, TimerEventSink, TimerRecord, TimerServiceConfig, TimerSnapshot,
    TimerState,
};
use crate::invoker::{Outcome, TimeoutInvoker};
use crate::persistence::{LoadReport, TimerStore};
use crate::policy::{RecoveryAction, RecoveryPolicy, RetryDecision, RetryPolicy};
use crate::schedule::NextTimeoutCalculator;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::pacemaker::{DispatchPacemaker, PacemakerEvent};

/// 时间索引的上界哨兵: 同一毫秒内排在所有真实 ID 之后
const ID_SENTINEL: &str = "\u{10FFFF}";

/// 调度器 Inner 结构体
struct SchedulerInner {
    /// 全量记录: ID -> TimerRecord
    /// DashMap 分片锁保证对单条记录的状态流转是串行的，
    /// 没有任何跨记录的全局锁 (避免一个慢重试拖住所有定时器)。
    records: DashMap<String, TimerRecord>,

    /// 时间索引: (到期毫秒, ID) -> ()
    /// 不变量: 每个定时器在索引里最多一个条目，且条目时刻 == 记录的 next_timeout。
    queue: Mutex<BTreeMap<(i64, String), ()>>,

    /// 持久化存储
    store: TimerStore,

    /// 超时执行器
    invoker: TimeoutInvoker,

    /// 下次到期计算器
    calc: NextTimeoutCalculator,

    /// 回滚重试策略
    retry_policy: RetryPolicy,

    /// 重启恢复策略
    recovery_policy: RecoveryPolicy,

    /// 结构化事件出口
    sink: Arc<dyn TimerEventSink>,

    /// 全局统计指标
    metrics: Arc<SchedulerMetrics>,

    /// 并发控制信号量 (有界执行池)
    semaphore: Arc<Semaphore>,

    /// 挂起覆盖层开关
    suspended: AtomicBool,

    /// 队列变化通知
    notify: Notify,

    /// 关机信号
    shutdown: CancellationToken,
}

/// 定时器调度器 (The Engine)
///
/// 唯一的派发循环在最早的 `next_timeout` 醒来，弹出所有到期条目，
/// 逐条做状态判定：InProgress 的记录本次到期被跳过 (Overlap Skip)，
/// 其余流转到 InProgress 并异步交给执行器。同一 ID 的触发严格串行，
/// 不同 ID 之间没有顺序保证。
pub struct TimerScheduler {
    inner: Arc<SchedulerInner>,
}

impl Clone for TimerScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// 派发循环对单条到期的判定结果
enum Dispatch {
    /// 正常触发: 携带派发瞬间的记录快照
    Run(TimerRecord),
    /// 上一次触发还在事务中: 本次到期永久丢弃
    Overlap,
    /// 记录已进入终态或已不存在: 陈旧条目，静默丢弃
    Stale,
}

impl TimerScheduler {
    pub fn new(
        store: TimerStore,
        invoker: TimeoutInvoker,
        sink: Arc<dyn TimerEventSink>,
        config: &TimerServiceConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let inner = SchedulerInner {
            records: DashMap::new(),
            queue: Mutex::new(BTreeMap::new()),
            store,
            invoker,
            calc: NextTimeoutCalculator::new(config.lookahead_years),
            retry_policy: RetryPolicy::new(config.retry.clone()),
            recovery_policy: RecoveryPolicy::new(config.recovery.clone()),
            sink,
            metrics: Arc::new(SchedulerMetrics::default()),
            semaphore: Arc::new(Semaphore::new(config.worker.max_concurrency)),
            suspended: AtomicBool::new(false),
            notify: Notify::new(),
            shutdown,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 暴露计算器给门面 (创建时算首次到期)
    pub fn calculator(&self) -> NextTimeoutCalculator {
        self.inner.calc
    }

    /// 暴露存储给门面
    pub fn store(&self) -> &TimerStore {
        &self.inner.store
    }

    /// 暴露指标
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.inner.metrics.clone()
    }

    // ==========================================
    // 1. 派发主循环
    // ==========================================

    /// 启动派发循环 (阻塞直到 shutdown)
    pub async fn run(&self) {
        trace!("[Scheduler] Dispatch loop started.");
        let mut pacemaker = DispatchPacemaker::new(
            &self.inner.suspended,
            &self.inner.notify,
            &self.inner.shutdown,
        );

        loop {
            // 最早的到期时刻 (只短暂持锁)
            let next_due = self
                .inner
                .queue
                .lock()
                .first_key_value()
                .map(|((millis, _), _)| *millis);

            match pacemaker.wait_until(next_due).await {
                PacemakerEvent::Trigger => {}
                PacemakerEvent::Shutdown => break,
            }

            // 弹出所有 <= now 的到期条目
            let now = TimeUtils::now_millis();
            let due: Vec<(i64, String)> = {
                let mut queue = self.inner.queue.lock();
                let keys: Vec<_> = queue
                    .range(..=(now, String::from(ID_SENTINEL)))
                    .map(|(k, _)| k.clone())
                    .collect();
                // 必须在锁内移除，条目只消费一次
                for k in &keys {
                    queue.remove(k);
                }
                keys
            };

            for (due_millis, id) in due {
                self.dispatch(id, due_millis).await;
            }
        }
        trace!("[Scheduler] Dispatch loop stopped.");
    }

    /// 单条到期的派发
    async fn dispatch(&self, id: String, due_millis: i64) {
        let due = TimeUtils::from_millis(due_millis);

        // 状态判定与流转在记录锁内完成；锁外做 IO
        let decision = {
            let Some(mut rec) = self.inner.records.get_mut(&id) else {
                return; // 已被取消清理
            };
            match rec.state {
                TimerState::InProgress => {
                    // 持久超限 (Overrun): 本次到期跳过，但后续计划照常续排
                    let next = self.inner.calc.following(&rec.schedule, due, TimeUtils::now());
                    rec.next_timeout = next;
                    if let Some(next) = next {
                        self.inner
                            .queue
                            .lock()
                            .insert((TimeUtils::to_millis(next), id.clone()), ());
                    }
                    Dispatch::Overlap
                }
                state if state.is_terminal() => Dispatch::Stale,
                _ => {
                    // Active / RetryWait / Created -> InProgress
                    rec.mark_in_progress();
                    // 常规触发在派发时就预排下一次到期，慢回调跨过它时
                    // 才能观测到 Overlap。重试触发例外: 重试未完成期间
                    // 常规到期被抑制 (Single-Flight)，成功后再续排。
                    let next = if rec.retry.attempts == 0 {
                        self.inner.calc.following(&rec.schedule, due, TimeUtils::now())
                    } else {
                        None
                    };
                    rec.next_timeout = next;
                    if let Some(next) = next {
                        self.inner
                            .queue
                            .lock()
                            .insert((TimeUtils::to_millis(next), id.clone()), ());
                    }
                    Dispatch::Run(rec.value().clone())
                }
            }
        };

        match decision {
            Dispatch::Stale => {}
            Dispatch::Overlap => {
                self.inner.metrics.inc_overlap_skip();
                self.emit(TimerEvent::OverlapSkipped { id, due }).await;
            }
            Dispatch::Run(snapshot) => {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    // 有界执行池: 许可跟随任务生命周期，Drop 自动归还
                    let Ok(_permit) = scheduler.inner.semaphore.clone().acquire_owned().await
                    else {
                        return;
                    };
                    scheduler.execute(snapshot).await;
                });
            }
        }
    }

    /// 执行一次触发并处理结果 (在独立任务里运行，绝不阻塞派发循环)
    async fn execute(&self, snapshot: TimerRecord) {
        // InProgress 状态先落库: 崩溃后重启能把它识别为模糊记录
        if let Err(e) = self.inner.store.update(&snapshot).await {
            self.report_persistence_failure(&snapshot.id, "put", e).await;
        }

        self.inner.metrics.inc_active();
        let fired_at = TimeUtils::now();
        let outcome = self.inner.invoker.invoke(&snapshot).await;
        self.inner.metrics.dec_active();

        self.handle_outcome(snapshot, fired_at, outcome).await;
    }

    // ==========================================
    // 2. 结果处理与重新武装
    // ==========================================

    /// 触发结束后的状态流转
    ///
    /// 同一 ID 的下一次派发永远在这里完成之后 (严格串行)。
    async fn handle_outcome(&self, snapshot: TimerRecord, fired_at: chrono::DateTime<chrono::Utc>, outcome: Outcome) {
        let id = snapshot.id.clone();

        // 取消可能发生在事务进行中: 完成时以记录的当前状态为准
        let canceled_in_flight = self
            .inner
            .records
            .get(&id)
            .map(|rec| rec.state == TimerState::Canceled)
            .unwrap_or(true);
        if canceled_in_flight {
            // 取消时已做持久化删除，这里只做内存清理
            self.inner.records.remove(&id);
            return;
        }

        match outcome {
            Outcome::Success => {
                self.inner.metrics.inc_success();
                self.rearm_after(&id, fired_at, true).await;
            }
            Outcome::Rollback(err) => {
                self.inner.metrics.inc_rollback();
                let now = TimeUtils::now();
                let decision = {
                    let Some(mut rec) = self.inner.records.get_mut(&id) else {
                        return;
                    };
                    rec.retry.record_failure(now);
                    self.inner.retry_policy.on_rollback(rec.retry.attempts, now)
                };
                trace!("[Scheduler] Timer {} rolled back: {:?} -> {:?}", id, err, decision);

                match decision {
                    RetryDecision::RetryAt { attempt, at } => {
                        self.inner.metrics.inc_retry();
                        {
                            let Some(mut rec) = self.inner.records.get_mut(&id) else {
                                return;
                            };
                            if rec.state.is_terminal() {
                                // 事务期间被取消: 清理内存残留
                                drop(rec);
                                self.inner.records.remove(&id);
                                return;
                            }
                            // 重试优先于常规到期: 先摘掉预排的常规条目
                            self.unqueue(&rec);
                            rec.state = TimerState::RetryWait;
                            rec.next_timeout = Some(at);
                            rec.touch();
                            self.inner
                                .queue
                                .lock()
                                .insert((TimeUtils::to_millis(at), id.clone()), ());
                        }
                        self.persist_current(&id).await;
                        self.inner.notify.notify_one();
                        self.emit(TimerEvent::RetryScheduled { id, attempt, at }).await;
                    }
                    RetryDecision::Revert => {
                        let attempts = self
                            .inner
                            .records
                            .get(&id)
                            .map(|r| r.retry.attempts)
                            .unwrap_or_default();
                        self.emit(TimerEvent::RetriesExhausted {
                            id: id.clone(),
                            attempts,
                            marked_failed: false,
                        })
                        .await;
                        // 回到常规计划，重试窗口清零
                        if let Some(mut rec) = self.inner.records.get_mut(&id) {
                            rec.retry.reset();
                        }
                        self.rearm_after(&id, fired_at, false).await;
                    }
                    RetryDecision::GiveUp => {
                        let attempts = self
                            .inner
                            .records
                            .get(&id)
                            .map(|r| r.retry.attempts)
                            .unwrap_or_default();
                        self.emit(TimerEvent::RetriesExhausted {
                            id: id.clone(),
                            attempts,
                            marked_failed: true,
                        })
                        .await;
                        self.mark_failed(&id, err.to_string()).await;
                    }
                }
            }
            Outcome::Fatal(err) => {
                self.inner.metrics.inc_rollback();
                self.mark_failed(&id, err.to_string()).await;
            }
            Outcome::TargetUnavailable => {
                // 既不是成功也不是可重试失败: 本次到期作废，计划照常
                self.emit(TimerEvent::TargetUnavailable {
                    id: id.clone(),
                    owner: snapshot.owner.clone(),
                })
                .await;
                self.rearm_after(&id, fired_at, false).await;
            }
        }
    }

    /// 成功 (或跳过) 之后的重新武装
    ///
    /// 派发时预排的常规条目还在就直接转 Active；没有 (单次定时器、
    /// 重试触发、或计划已走完) 就现算下一次，算不出来则过期。
    async fn rearm_after(&self, id: &str, fired_at: chrono::DateTime<chrono::Utc>, success: bool) {
        let expired = {
            let Some(mut rec) = self.inner.records.get_mut(id) else {
                return;
            };
            if rec.state.is_terminal() {
                // 事务期间被取消: 清理内存残留
                drop(rec);
                self.inner.records.remove(id);
                return;
            }
            if success {
                rec.retry.reset();
                rec.last_fire = Some(fired_at);
            }
            match rec.next_timeout {
                Some(_) => {
                    rec.state = TimerState::Active;
                    rec.touch();
                    false
                }
                None => {
                    match self
                        .inner
                        .calc
                        .following(&rec.schedule, fired_at, TimeUtils::now())
                    {
                        Some(next) => {
                            rec.state = TimerState::Active;
                            rec.next_timeout = Some(next);
                            rec.touch();
                            self.inner
                                .queue
                                .lock()
                                .insert((TimeUtils::to_millis(next), rec.id.clone()), ());
                            false
                        }
                        None => {
                            rec.mark_terminal(TimerState::Expired);
                            true
                        }
                    }
                }
            }
        };

        if expired {
            self.inner.metrics.inc_expired();
            let removed = self.inner.records.remove(id);
            let persistent = removed.map(|(_, rec)| rec.persistent).unwrap_or(false);
            if persistent {
                if let Err(e) = self.inner.store.remove(id).await {
                    self.report_persistence_failure(id, "delete", e).await;
                }
            }
            self.emit(TimerEvent::Expired { id: id.to_string() }).await;
        } else {
            self.persist_current(id).await;
            self.inner.notify.notify_one();
        }
    }

    /// 进入 Failed 终态 (保留记录供管理方检视)
    async fn mark_failed(&self, id: &str, reason: String) {
        {
            let Some(mut rec) = self.inner.records.get_mut(id) else {
                return;
            };
            if rec.state.is_terminal() {
                return;
            }
            self.unqueue(&rec);
            rec.mark_terminal(TimerState::Failed);
        }
        self.persist_current(id).await;
        self.emit(TimerEvent::Failed {
            id: id.to_string(),
            reason,
        })
        .await;
    }

    // ==========================================
    // 3. 对外操作 (入队 / 取消 / 挂起 / 恢复加载)
    // ==========================================

    /// 把一条已算好 next_timeout 的记录纳入调度
    pub fn schedule(&self, record: TimerRecord) {
        let due = record.next_timeout.map(TimeUtils::to_millis);
        let id = record.id.clone();
        self.inner.records.insert(id.clone(), record);
        if let Some(due) = due {
            self.inner.queue.lock().insert((due, id), ());
            self.inner.notify.notify_one();
        }
    }

    /// 取消定时器 (幂等)
    ///
    /// - 未触发: 同步摘除，立即生效。
    /// - 触发中: 取消被持久化记录后立即返回，进行中的事务不会被打断，
    ///   清理推迟到本次触发结束；之后不会再有任何到期。
    pub async fn cancel(&self, id: &str) -> crate::common::Result<()> {
        let (was_pending, persistent) = {
            let Some(mut rec) = self.inner.records.get_mut(id) else {
                return Ok(()); // 不存在/已清理: 幂等成功
            };
            if rec.state.is_terminal() {
                return Ok(());
            }
            let in_flight = rec.state == TimerState::InProgress;
            self.unqueue(&rec);
            let persistent = rec.persistent;
            rec.mark_terminal(TimerState::Canceled);
            (!in_flight, persistent)
        };

        // 取消必须先于返回被持久化 (对持久化定时器)
        if persistent {
            self.inner.store.remove(id).await?;
        }
        if was_pending {
            self.inner.records.remove(id);
        }
        self.emit(TimerEvent::Canceled { id: id.to_string() }).await;
        Ok(())
    }

    /// 进入挂起覆盖层: 到期的触发被推迟，不是跳过
    pub fn suspend(&self) {
        self.inner.suspended.store(true, Ordering::Release);
        trace!("[Scheduler] Suspended.");
    }

    /// 退出挂起覆盖层: 被推迟的到期立即派发
    pub fn resume(&self) {
        self.inner.suspended.store(false, Ordering::Release);
        self.inner.notify.notify_one();
        trace!("[Scheduler] Resumed.");
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    /// 启动时恢复持久化记录
    ///
    /// - 到期在过去的记录: 保留原到期时刻入队 -> 立即派发一次补触发，
    ///   之后计划从"现在"续排 (单次补触发规则)。
    /// - InProgress 的模糊记录: 按恢复策略裁决，绝不静默续跑。
    /// - 终态记录: 不该出现在存储里，顺手清掉。
    pub async fn restore(&self, report: LoadReport) {
        let now = TimeUtils::now();

        for (id, reason) in report.skipped {
            self.emit(TimerEvent::CorruptRecordSkipped { id, reason }).await;
        }

        for mut rec in report.records {
            match rec.state {
                TimerState::Canceled | TimerState::Expired => {
                    let _ = self.inner.store.remove(&rec.id).await;
                    continue;
                }
                TimerState::Failed => {
                    // 管理方还没裁决: 保留在内存供检视，不参与调度
                    self.inner.records.insert(rec.id.clone(), rec);
                    continue;
                }
                TimerState::InProgress => {
                    let policy = self.inner.recovery_policy.policy();
                    self.emit(TimerEvent::AmbiguousInProgress {
                        id: rec.id.clone(),
                        policy,
                    })
                    .await;
                    match self.inner.recovery_policy.on_in_progress() {
                        RecoveryAction::RetryNow => {
                            rec.retry.record_failure(now);
                            rec.state = TimerState::RetryWait;
                            rec.next_timeout = Some(now);
                            rec.touch();
                            if let Err(e) = self.inner.store.update(&rec).await {
                                self.report_persistence_failure(&rec.id, "put", e).await;
                            }
                            self.schedule(rec);
                        }
                        RecoveryAction::MarkFailed => {
                            rec.mark_terminal(TimerState::Failed);
                            let reason = "in-progress at unclean shutdown".to_string();
                            if let Err(e) = self.inner.store.update(&rec).await {
                                self.report_persistence_failure(&rec.id, "put", e).await;
                            }
                            let id = rec.id.clone();
                            self.inner.records.insert(id.clone(), rec);
                            self.emit(TimerEvent::Failed { id, reason }).await;
                        }
                    }
                }
                _ => {
                    // Active / RetryWait / Created
                    if rec.next_timeout.is_none() {
                        rec.next_timeout =
                            self.inner.calc.initial(&rec.schedule, rec.created_at, now);
                    }
                    match rec.next_timeout {
                        None => {
                            // 重启后计划已不可满足
                            rec.mark_terminal(TimerState::Expired);
                            self.inner.metrics.inc_expired();
                            let _ = self.inner.store.remove(&rec.id).await;
                            self.emit(TimerEvent::Expired { id: rec.id.clone() }).await;
                        }
                        Some(next) => {
                            if next < now {
                                // 停机期间错过: 原时刻入队即是那一次补触发
                                self.emit(TimerEvent::CatchUpScheduled {
                                    id: rec.id.clone(),
                                    missed: next,
                                })
                                .await;
                            }
                            rec.state = TimerState::Active;
                            self.schedule(rec);
                        }
                    }
                }
            }
        }
    }

    // ==========================================
    // 4. 快照与辅助
    // ==========================================

    /// 指定 Owner 的快照 (绝不是活视图)
    pub fn snapshot_owner(&self, owner: &str) -> Vec<TimerSnapshot> {
        self.inner
            .records
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| TimerSnapshot::from(entry.value()))
            .collect()
    }

    /// 全量活跃快照 (管理面板用)
    pub fn snapshot_active(&self) -> Vec<TimerSnapshot> {
        self.inner
            .records
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| TimerSnapshot::from(entry.value()))
            .collect()
    }

    /// 单条记录快照
    pub fn snapshot_one(&self, id: &str) -> Option<TimerSnapshot> {
        self.inner
            .records
            .get(id)
            .map(|entry| TimerSnapshot::from(entry.value()))
    }

    /// 从时间索引摘掉记录当前的条目 (若有)
    fn unqueue(&self, rec: &TimerRecord) {
        if let Some(next) = rec.next_timeout {
            self.inner
                .queue
                .lock()
                .remove(&(TimeUtils::to_millis(next), rec.id.clone()));
        }
    }

    /// 把记录当前状态落库，失败按"该定时器致命"上报
    async fn persist_current(&self, id: &str) {
        let snapshot = self.inner.records.get(id).map(|rec| rec.value().clone());
        if let Some(rec) = snapshot {
            if let Err(e) = self.inner.store.update(&rec).await {
                self.report_persistence_failure(id, "put", e).await;
            }
        }
    }

    async fn report_persistence_failure(
        &self,
        id: &str,
        op: &'static str,
        err: crate::common::TimerError,
    ) {
        error!("[Scheduler] Persistence {} failed for {}: {}", op, id, err);
        self.emit(TimerEvent::PersistenceFailure {
            id: id.to_string(),
            op,
            message: err.to_string(),
        })
        .await;
    }

    async fn emit(&self, event: TimerEvent) {
        self.inner.sink.on_event(event).await;
    }
}
