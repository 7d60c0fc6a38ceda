use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::{
    NoTransaction, TimerEventSink, TimerServiceConfig, TracingEventSink, TransactionBoundary,
};
use crate::invoker::{TargetRegistry, TimeoutInvoker};
use crate::persistence::{MemoryBackend, RecordBackend, TimerStore};
use crate::scheduler::TimerScheduler;
use crate::service::facade::TimerService;

/// 定时器服务构造器 (Builder Pattern)
///
/// **默认行为**:
/// - Config: Default
/// - Backend: MemoryBackend (非持久部署/测试用)
/// - Transactions: NoTransaction (无事务语义)
/// - EventSink: TracingEventSink (事件落 tracing 日志)
pub struct TimerServiceBuilder {
    config: Option<TimerServiceConfig>,
    backend: Option<Arc<dyn RecordBackend>>,
    boundary: Option<Arc<dyn TransactionBoundary>>,
    sink: Option<Arc<dyn TimerEventSink>>,
    shutdown: Option<CancellationToken>,
}

impl Default for TimerServiceBuilder {
    fn default() -> Self {
        Self {
            config: None,
            backend: None,
            boundary: None,
            sink: None,
            shutdown: None,
        }
    }
}

impl TimerServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置服务配置
    pub fn with_config(mut self, config: TimerServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置持久化后端
    pub fn with_backend<B>(mut self, backend: B) -> Self
    where
        B: RecordBackend + 'static,
    {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// 设置持久化后端 (已共享的句柄)
    pub fn with_shared_backend(mut self, backend: Arc<dyn RecordBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 设置事务边界
    pub fn with_transactions<B>(mut self, boundary: B) -> Self
    where
        B: TransactionBoundary + 'static,
    {
        self.boundary = Some(Arc::new(boundary));
        self
    }

    /// 设置事件出口
    pub fn with_event_sink<S>(mut self, sink: S) -> Self
    where
        S: TimerEventSink + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// 设置事件出口 (已共享的句柄)
    pub fn with_shared_event_sink(mut self, sink: Arc<dyn TimerEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 设置外部关机 Token (不设则内部新建)
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// 组装服务
    pub fn build(self) -> TimerService {
        let config = self.config.unwrap_or_default();

        let backend = self.backend.unwrap_or_else(|| {
            debug!("[Builder] Using default MemoryBackend (non-durable).");
            Arc::new(MemoryBackend::new())
        });
        let boundary = self
            .boundary
            .unwrap_or_else(|| Arc::new(NoTransaction));
        let sink: Arc<dyn TimerEventSink> = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let shutdown = self.shutdown.unwrap_or_default();

        let registry = Arc::new(TargetRegistry::new());
        let store = TimerStore::new(backend, config.store.clone());
        let invoker = TimeoutInvoker::new(registry.clone(), boundary);
        let scheduler = TimerScheduler::new(store, invoker, sink.clone(), &config, shutdown.clone());

        TimerService::from_parts(scheduler, registry, sink, shutdown)
    }
}
