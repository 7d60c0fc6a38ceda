//! 服务级集成测试: 在内存后端上驱动完整的
//! 创建 -> 派发 -> 事务执行 -> 重新武装 链路。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::sleep;

use kairos::common::{
    CallbackError, TimeoutHandler, TimerEvent, TimerEventSink, TimerServiceConfig, TimerState,
};
use kairos::persistence::MemoryBackend;
use kairos::schedule::ScheduleSpec;
use kairos::service::{TimerService, TimerServiceBuilder};

// ==========================================
// 测试工具
// ==========================================

/// 收集所有事件的测试出口
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<TimerEvent>>,
}

#[async_trait]
impl TimerEventSink for RecordingSink {
    async fn on_event(&self, event: TimerEvent) {
        self.events.lock().push(event);
    }
}

impl RecordingSink {
    fn count(&self, pred: impl Fn(&TimerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

/// 可编程回调: 前 `fail_first` 次失败，可选睡眠，记录并发峰值
struct ProbeHandler {
    calls: AtomicU32,
    fail_first: u32,
    sleep_for: Duration,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    completed: AtomicU32,
}

impl ProbeHandler {
    fn new(fail_first: u32, sleep_for: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first,
            sleep_for,
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            completed: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeoutHandler for ProbeHandler {
    async fn on_timeout(&self, _timer_id: &str, _info: &[u8]) -> Result<(), CallbackError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(active, Ordering::SeqCst);

        if !self.sleep_for.is_zero() {
            sleep(self.sleep_for).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if n <= self.fail_first {
            return Err(CallbackError::retryable(anyhow::anyhow!("attempt {n} fails")));
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn service_with(sink: Arc<RecordingSink>) -> TimerService {
    TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_shared_event_sink(sink)
        .build()
}

// ==========================================
// 1. 单次定时器与过期
// ==========================================

#[tokio::test]
async fn past_instant_fires_once_immediately_then_expires() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    let handler = ProbeHandler::new(0, Duration::ZERO);
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    // 过去的时刻: 最多触发一次，且是立即触发
    let record = service
        .create_single_action_timer("orders", Utc::now() - chrono::Duration::seconds(30), vec![], false)
        .await
        .unwrap();

    sleep(Duration::from_millis(300)).await;

    assert_eq!(handler.calls(), 1);
    assert!(service.get_timer(&record.id).is_none(), "expired timer must be gone");
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::Expired { .. })), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn unsatisfiable_calendar_expires_at_creation() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    service.start().await.unwrap();

    // 2 月 31 日永远不会出现
    let spec = ScheduleSpec::new()
        .second("0")
        .minute("0")
        .hour("0")
        .day_of_month("31")
        .month("Feb")
        .day_of_week("*");
    let record = service
        .create_calendar_timer("orders", spec, vec![], true)
        .await
        .unwrap();

    assert_eq!(record.state, TimerState::Expired);
    assert!(record.next_timeout.is_none());
    assert!(service.get_timer(&record.id).is_none());
    assert_eq!(
        sink.count(|e| matches!(e, TimerEvent::UnsatisfiableSchedule { .. })),
        1
    );

    service.shutdown().await;
}

#[tokio::test]
async fn validation_errors_are_synchronous() {
    let service = service_with(Arc::new(RecordingSink::default()));

    // 间隔为零
    let err = service
        .create_interval_timer("orders", Duration::ZERO, Duration::ZERO, vec![], false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("interval"));

    // 坏表达式: 错误必须指明字段
    let spec = ScheduleSpec::new()
        .second("0")
        .minute("0")
        .hour("0")
        .day_of_month("32")
        .month("*")
        .day_of_week("*");
    let err = service
        .create_calendar_timer("orders", spec, vec![], false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("day-of-month"));

    // 没有任何定时器被创建
    assert!(service.all_active_timeouts().is_empty());
}

// ==========================================
// 2. Single-Flight 与重叠跳过
// ==========================================

#[tokio::test]
async fn slow_callback_yields_overlap_skip_not_concurrency() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    // 回调耗时远超间隔
    let handler = ProbeHandler::new(0, Duration::from_millis(250));
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    service
        .create_interval_timer(
            "orders",
            Duration::ZERO,
            Duration::from_millis(50),
            vec![],
            false,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(600)).await;
    service.shutdown().await;

    // 同一 ID 永不并发
    assert_eq!(handler.max_concurrent.load(Ordering::SeqCst), 1);
    // 慢回调跨过的到期必须被上报为重叠跳过，而不是静默丢弃
    assert!(
        sink.count(|e| matches!(e, TimerEvent::OverlapSkipped { .. })) >= 1,
        "expected at least one overlap skip event"
    );
    assert!(handler.calls() >= 1);
}

// ==========================================
// 3. 回滚重试
// ==========================================

#[tokio::test]
async fn rollback_then_success_resets_retry_counter() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    // 前两次回滚，第三次成功
    let handler = ProbeHandler::new(2, Duration::ZERO);
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    // 间隔拉得很长: 窗口内只有第一次到期和它的重试
    let record = service
        .create_interval_timer(
            "orders",
            Duration::ZERO,
            Duration::from_secs(60),
            vec![],
            false,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(800)).await;

    // 恰好 N 次调用: 2 次失败 + 1 次成功，没有丢失也没有重复
    assert_eq!(handler.calls(), 3);
    assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::RetryScheduled { .. })), 2);

    // 成功后重试计数归零，定时器回到 Active 等下一次常规到期
    let snapshot = service.get_timer(&record.id).expect("timer still armed");
    assert_eq!(snapshot.retry_attempts, 0);
    assert_eq!(snapshot.state, TimerState::Active);

    let metrics = service.metrics();
    assert_eq!(metrics.total_rollbacks.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.total_success.load(Ordering::Relaxed), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn retries_exhausted_reverts_to_schedule_and_reports() {
    let sink = Arc::new(RecordingSink::default());
    let mut config = TimerServiceConfig::new_dev();
    config.retry.max_attempts = 1;
    let service = TimerServiceBuilder::new()
        .with_config(config)
        .with_shared_event_sink(sink.clone())
        .build();
    // 永远失败
    let handler = ProbeHandler::new(u32::MAX, Duration::ZERO);
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    service
        .create_interval_timer(
            "orders",
            Duration::ZERO,
            Duration::from_secs(60),
            vec![],
            false,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(500)).await;
    service.shutdown().await;

    // 首次 + 1 次重试 = 2 次调用，然后耗尽并回到常规计划
    assert_eq!(handler.calls(), 2);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            TimerEvent::RetriesExhausted {
                marked_failed: false,
                ..
            }
        )),
        1
    );
}

// ==========================================
// 4. 取消语义
// ==========================================

#[tokio::test]
async fn cancel_is_idempotent_and_durable() {
    let backend = MemoryBackend::new();
    let sink = Arc::new(RecordingSink::default());
    let service = TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_backend(backend.clone())
        .with_shared_event_sink(sink.clone())
        .build();
    service.start().await.unwrap();

    let record = service
        .create_interval_timer(
            "orders",
            Duration::from_secs(600),
            Duration::from_secs(600),
            vec![],
            true,
        )
        .await
        .unwrap();
    assert_eq!(backend.len(), 1);

    service.cancel_timer(&record.id).await.unwrap();
    // 取消已持久化: 后端里没有这条记录了
    assert!(backend.is_empty());
    assert!(service.get_timer(&record.id).is_none());

    // 幂等: 再取消、取消不存在的 ID 都不是错误
    service.cancel_timer(&record.id).await.unwrap();
    service.cancel_timer("no-such-timer").await.unwrap();

    service.shutdown().await;
}

#[tokio::test]
async fn cancel_in_flight_lets_invocation_finish_but_stops_the_rest() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    let handler = ProbeHandler::new(0, Duration::from_millis(300));
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    let record = service
        .create_interval_timer(
            "orders",
            Duration::ZERO,
            Duration::from_millis(100),
            vec![],
            false,
        )
        .await
        .unwrap();

    // 等回调进入事务
    sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.calls(), 1);

    // 取消立刻返回，但不打断进行中的回调
    service.cancel_timer(&record.id).await.unwrap();
    assert_eq!(handler.completed.load(Ordering::SeqCst), 0, "callback still running");

    // 回调自然跑完；之后不再有任何到期
    sleep(Duration::from_millis(500)).await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
    assert!(service.get_timer(&record.id).is_none());

    service.shutdown().await;
}

// ==========================================
// 5. 持久化与重启恢复
// ==========================================

#[tokio::test]
async fn persistent_timer_survives_restart_with_same_next_timeout() {
    let backend = MemoryBackend::new();

    // 第一代服务: 创建持久化定时器后停机
    let first = TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_backend(backend.clone())
        .build();
    first.start().await.unwrap();
    let record = first
        .create_interval_timer(
            "orders",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            b"job-42".to_vec(),
            true,
        )
        .await
        .unwrap();
    first.shutdown().await;

    // 第二代服务: 从同一个后端恢复
    let sink = Arc::new(RecordingSink::default());
    let second = TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_backend(backend.clone())
        .with_shared_event_sink(sink.clone())
        .build();
    second.start().await.unwrap();

    let snapshot = second.get_timer(&record.id).expect("timer reloaded");
    assert_eq!(snapshot.state, TimerState::Active);
    // 重启前后 next_timeout 一致 (没有错过到期，不走补触发)
    assert_eq!(snapshot.next_timeout, record.next_timeout);
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::CatchUpScheduled { .. })), 0);

    second.shutdown().await;
}

#[tokio::test]
async fn missed_occurrence_gets_exactly_one_catch_up_firing() {
    let backend = MemoryBackend::new();

    // 第一代服务从未启动派发循环: 到期时刻在停机期间流逝
    let first = TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_backend(backend.clone())
        .build();
    first.start().await.unwrap();
    first
        .create_single_action_timer(
            "orders",
            Utc::now() + chrono::Duration::milliseconds(50),
            vec![],
            true,
        )
        .await
        .unwrap();
    // 立即停机, 不给它触发的机会
    first.shutdown().await;
    sleep(Duration::from_millis(200)).await;

    // 第二代服务: 加载到过去的到期 -> 恰好一次补触发
    let sink = Arc::new(RecordingSink::default());
    let handler = ProbeHandler::new(0, Duration::ZERO);
    let second = TimerServiceBuilder::new()
        .with_config(TimerServiceConfig::new_dev())
        .with_backend(backend.clone())
        .with_shared_event_sink(sink.clone())
        .build();
    second.register_target("orders", handler.clone());
    second.start().await.unwrap();

    sleep(Duration::from_millis(300)).await;

    assert_eq!(handler.calls(), 1);
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::CatchUpScheduled { .. })), 1);
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::Expired { .. })), 1);

    second.shutdown().await;
}

// ==========================================
// 6. 挂起覆盖层
// ==========================================

#[tokio::test]
async fn suspension_defers_firings_until_resume() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    let handler = ProbeHandler::new(0, Duration::ZERO);
    service.register_target("orders", handler.clone());
    service.start().await.unwrap();

    service.suspend();
    service
        .create_single_action_timer(
            "orders",
            Utc::now() + chrono::Duration::milliseconds(50),
            vec![],
            false,
        )
        .await
        .unwrap();

    // 挂起期间到期: 被推迟，不触发也不算跳过
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.calls(), 0);
    assert_eq!(sink.count(|e| matches!(e, TimerEvent::OverlapSkipped { .. })), 0);

    // 恢复后补发恰好一次
    service.resume();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.calls(), 1);

    service.shutdown().await;
}

// ==========================================
// 7. 目标不可用
// ==========================================

#[tokio::test]
async fn unregistered_target_skips_occurrence_and_schedule_continues() {
    let sink = Arc::new(RecordingSink::default());
    let service = service_with(sink.clone());
    service.start().await.unwrap();

    // 不注册任何回调
    let record = service
        .create_interval_timer(
            "ghost",
            Duration::ZERO,
            Duration::from_millis(100),
            vec![],
            false,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(450)).await;

    // 每次到期都被跳过并上报，但定时器保持活跃
    assert!(sink.count(|e| matches!(e, TimerEvent::TargetUnavailable { .. })) >= 2);
    let snapshot = service.get_timer(&record.id).expect("timer still armed");
    assert_eq!(snapshot.state, TimerState::Active);

    // 中途部署目标: 下一次到期开始正常触发
    let handler = ProbeHandler::new(0, Duration::ZERO);
    service.register_target("ghost", handler.clone());
    sleep(Duration::from_millis(300)).await;
    assert!(handler.calls() >= 1);

    service.shutdown().await;
}
