use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::common::{
    Result, Schedule, TimeUtils, TimerError, TimerEvent, TimerEventSink, TimerRecord,
    TimerSnapshot, TimerState, TimeoutHandler,
};
use crate::invoker::TargetRegistry;
use crate::schedule::ScheduleSpec;
use crate::scheduler::{SchedulerMetrics, TimerScheduler};

/// 服务 Inner 结构体
struct ServiceInner {
    /// 调度器核心
    scheduler: TimerScheduler,

    /// 目标回调注册表
    registry: Arc<TargetRegistry>,

    /// 结构化事件出口 (门面自己的事件从这里走)
    sink: Arc<dyn TimerEventSink>,

    /// 关机信号
    shutdown: CancellationToken,

    /// 是否已启动
    started: AtomicBool,

    /// 派发循环句柄 (shutdown 时回收)
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

/// 定时器服务门面 (The Public Face)
///
/// 这是调用方直接交互的对象。它封装了存储、调度器、执行器的组装
/// 细节，只暴露创建/取消/查询/挂起这一层公共 API。生命周期显式：
/// 谁构建谁负责 `start()` 和 `shutdown()`，没有进程级的幕后线程。
pub struct TimerService {
    inner: Arc<ServiceInner>,
}

impl Clone for TimerService {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl TimerService {
    pub(crate) fn from_parts(
        scheduler: TimerScheduler,
        registry: Arc<TargetRegistry>,
        sink: Arc<dyn TimerEventSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                scheduler,
                registry,
                sink,
                shutdown,
                started: AtomicBool::new(false),
                dispatch_handle: Mutex::new(None),
            }),
        }
    }

    // ==========================================
    // 1. 生命周期
    // ==========================================

    /// 启动服务
    ///
    /// 1. 全量加载持久化记录并按恢复规则对账 (补触发/模糊记录裁决)。
    /// 2. 拉起派发循环。
    pub async fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TimerError::ServiceShutdown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TimerError::Config("timer service already started".into()));
        }

        // 恢复持久化状态
        let report = self.inner.scheduler.store().load_all().await?;
        debug!(
            "[Service] Loaded {} records ({} corrupt skipped, {} ambiguous in-progress).",
            report.records.len(),
            report.skipped.len(),
            report.in_progress.len()
        );
        self.inner.scheduler.restore(report).await;

        // 拉起派发循环
        let scheduler = self.inner.scheduler.clone();
        let handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        *self.inner.dispatch_handle.lock() = Some(handle);

        trace!("[Service] Started.");
        Ok(())
    }

    /// 优雅停机
    ///
    /// 派发循环立即退出；进行中的触发自行跑完 (不被打断)。幂等。
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.dispatch_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        trace!("[Service] Shutdown complete.");
    }

    // ==========================================
    // 2. 目标注册
    // ==========================================

    /// 注册目标回调
    ///
    /// 方法形状的适配由调用方完成；这里只接受归一化的
    /// `(timer_id, info) -> result` 形状。
    pub fn register_target(&self, owner: &str, handler: Arc<dyn TimeoutHandler>) {
        self.inner.registry.register(owner, handler);
    }

    /// 卸载目标
    ///
    /// 进行中的触发不受影响；之后的到期按"目标不可用"跳过。
    pub fn unregister_target(&self, owner: &str) {
        self.inner.registry.unregister(owner);
    }

    // ==========================================
    // 3. 创建 / 取消 / 查询
    // ==========================================

    /// 创建定时器
    ///
    /// 校验同步完成：计划不合法直接报错，不会产生任何记录。
    /// 日历表达式在搜索窗口内不可满足不算错误：定时器创建即过期，
    /// 并向管理通道上报警告。
    pub async fn create_timer(
        &self,
        owner: &str,
        schedule: Schedule,
        info: Vec<u8>,
        persistent: bool,
    ) -> Result<TimerRecord> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TimerError::ServiceShutdown);
        }
        if owner.trim().is_empty() {
            return Err(TimerError::InvalidArgument("owner must not be empty".into()));
        }
        if let Schedule::Interval { every, .. } = &schedule {
            if every.is_zero() {
                return Err(TimerError::InvalidArgument(
                    "interval must be positive".into(),
                ));
            }
        }

        let mut record = TimerRecord::new(owner, schedule, info, persistent);
        let now = TimeUtils::now();
        match self
            .inner
            .scheduler
            .calculator()
            .initial(&record.schedule, record.created_at, now)
        {
            None => {
                // 不可满足: 创建即过期，上报警告，不入库不入队
                record.mark_terminal(TimerState::Expired);
                self.inner
                    .sink
                    .on_event(TimerEvent::UnsatisfiableSchedule {
                        id: record.id.clone(),
                    })
                    .await;
                Ok(record)
            }
            Some(first) => {
                record.next_timeout = Some(first);
                record.state = TimerState::Active;

                // 持久化失败直接上抛给调用方，不会留下半个定时器
                self.inner.scheduler.store().persist(&record).await?;
                self.inner.scheduler.schedule(record.clone());
                self.inner
                    .sink
                    .on_event(TimerEvent::Created {
                        id: record.id.clone(),
                        owner: record.owner.clone(),
                    })
                    .await;
                Ok(record)
            }
        }
    }

    /// 创建日历定时器 (便捷入口)
    pub async fn create_calendar_timer(
        &self,
        owner: &str,
        spec: ScheduleSpec,
        info: Vec<u8>,
        persistent: bool,
    ) -> Result<TimerRecord> {
        let expr = spec.parse()?;
        self.create_timer(owner, Schedule::Calendar(expr), info, persistent)
            .await
    }

    /// 创建间隔定时器 (便捷入口)
    pub async fn create_interval_timer(
        &self,
        owner: &str,
        initial_delay: Duration,
        every: Duration,
        info: Vec<u8>,
        persistent: bool,
    ) -> Result<TimerRecord> {
        self.create_timer(
            owner,
            Schedule::Interval {
                initial_delay,
                every,
            },
            info,
            persistent,
        )
        .await
    }

    /// 创建单次定时器 (便捷入口)
    pub async fn create_single_action_timer(
        &self,
        owner: &str,
        at: DateTime<Utc>,
        info: Vec<u8>,
        persistent: bool,
    ) -> Result<TimerRecord> {
        self.create_timer(owner, Schedule::At(at), info, persistent)
            .await
    }

    /// 取消定时器 (幂等)
    ///
    /// 返回时取消已被持久化记录；若该定时器正在触发中，进行中的
    /// 回调不会被打断，调用方不得假设回调已经停止。
    pub async fn cancel_timer(&self, id: &str) -> Result<()> {
        self.inner.scheduler.cancel(id).await
    }

    /// 指定 Owner 的定时器快照 (绝不是活视图)
    pub fn get_timers(&self, owner: &str) -> Vec<TimerSnapshot> {
        self.inner.scheduler.snapshot_owner(owner)
    }

    /// 单条定时器快照
    pub fn get_timer(&self, id: &str) -> Option<TimerSnapshot> {
        self.inner.scheduler.snapshot_one(id)
    }

    /// 全量活跃到期快照 (管理面用)
    pub fn all_active_timeouts(&self) -> Vec<TimerSnapshot> {
        self.inner.scheduler.snapshot_active()
    }

    /// 运行指标
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.inner.scheduler.metrics()
    }

    // ==========================================
    // 4. 挂起覆盖层 (Suspension)
    // ==========================================

    /// 挂起: 之后到期的触发被推迟 (不是跳过)，恢复后统一派发。
    /// 宿主也用它承接外部裁决的"本节点不持有所有权"信号。
    pub fn suspend(&self) {
        self.inner.scheduler.suspend();
    }

    /// 恢复: 被推迟的到期立即派发
    pub fn resume(&self) {
        self.inner.scheduler.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.scheduler.is_suspended()
    }
}
