use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, trace};

use crate::common::model::TimerRecord;
use crate::common::traits::{CallbackError, TransactionBoundary};
use crate::invoker::outcome::Outcome;
use crate::invoker::registry::TargetRegistry;

/// 超时执行器 (TimeoutInvoker)
///
/// 职责：
/// 1. 查注册表拿到目标回调 (查不到 -> TargetUnavailable)。
/// 2. 通过注入的事务边界做 begin/commit/rollback 划界。
/// 3. 兜住回调 Panic，折算成回滚。
/// 4. 把结果折叠成显式的 `Outcome` 交回调度器，自己绝不做重排决策。
pub struct TimeoutInvoker {
    registry: Arc<TargetRegistry>,
    boundary: Arc<dyn TransactionBoundary>,
}

impl TimeoutInvoker {
    pub fn new(registry: Arc<TargetRegistry>, boundary: Arc<dyn TransactionBoundary>) -> Self {
        Self { registry, boundary }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// 执行一次触发
    ///
    /// 调用期间会挂起等待事务往返，这是普通的异步等待，
    /// 不会阻塞派发循环。
    pub async fn invoke(&self, record: &TimerRecord) -> Outcome {
        // 1. 即时查表: 目标可能在到期和执行之间被卸载
        let Some(handler) = self.registry.get(&record.owner) else {
            return Outcome::TargetUnavailable;
        };

        // 2. 开事务
        let tx = match self.boundary.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                // 连事务都开不了，按可重试失败处理
                error!("[Invoker] Begin transaction failed for {}: {:?}", record.id, e);
                return Outcome::Rollback(e);
            }
        };

        // 3. 执行回调，兜住 Panic
        let result = AssertUnwindSafe(handler.on_timeout(&record.id, &record.info))
            .catch_unwind()
            .await;

        // 4. 按结果收尾事务
        match result {
            Ok(Ok(())) => match tx.commit().await {
                Ok(()) => Outcome::Success,
                Err(e) => {
                    // 提交失败等价于回滚
                    error!("[Invoker] Commit failed for {}: {:?}", record.id, e);
                    Outcome::Rollback(e)
                }
            },
            Ok(Err(CallbackError::Retryable(e))) => {
                trace!("[Invoker] Callback for {} rolled back: {:?}", record.id, e);
                if let Err(rb) = tx.rollback().await {
                    error!("[Invoker] Rollback failed for {}: {:?}", record.id, rb);
                }
                Outcome::Rollback(e)
            }
            Ok(Err(CallbackError::Fatal(e))) => {
                if let Err(rb) = tx.rollback().await {
                    error!("[Invoker] Rollback failed for {}: {:?}", record.id, rb);
                }
                Outcome::Fatal(e)
            }
            Err(panic_err) => {
                let msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    format!("Panic: {}", s)
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    format!("Panic: {}", s)
                } else {
                    "Panic: Unknown error".to_string()
                };
                error!("[Invoker] Callback for {} panicked: {}", record.id, msg);
                if let Err(rb) = tx.rollback().await {
                    error!("[Invoker] Rollback failed for {}: {:?}", record.id, rb);
                }
                Outcome::Rollback(anyhow::anyhow!(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::Schedule;
    use crate::common::traits::{NoTransaction, TimeoutHandler};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TimeoutHandler for CountingHandler {
        async fn on_timeout(&self, _timer_id: &str, _info: &[u8]) -> Result<(), CallbackError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(CallbackError::retryable(anyhow::anyhow!("boom #{n}")));
            }
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TimeoutHandler for PanickingHandler {
        async fn on_timeout(&self, _timer_id: &str, _info: &[u8]) -> Result<(), CallbackError> {
            panic!("handler exploded");
        }
    }

    fn record_for(owner: &str) -> TimerRecord {
        TimerRecord::new(owner, Schedule::At(Utc::now()), Vec::new(), false)
    }

    fn invoker_with(owner: &str, handler: Arc<dyn TimeoutHandler>) -> TimeoutInvoker {
        let registry = Arc::new(TargetRegistry::new());
        registry.register(owner, handler);
        TimeoutInvoker::new(registry, Arc::new(NoTransaction))
    }

    #[tokio::test]
    async fn success_and_rollback_outcomes() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let invoker = invoker_with("t", handler.clone());
        let record = record_for("t");

        assert!(matches!(invoker.invoke(&record).await, Outcome::Rollback(_)));
        assert!(matches!(invoker.invoke(&record).await, Outcome::Success));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_target_is_unavailable() {
        let invoker = TimeoutInvoker::new(Arc::new(TargetRegistry::new()), Arc::new(NoTransaction));
        let record = record_for("ghost");
        assert!(matches!(invoker.invoke(&record).await, Outcome::TargetUnavailable));
    }

    #[tokio::test]
    async fn panic_is_contained_as_rollback() {
        let invoker = invoker_with("t", Arc::new(PanickingHandler));
        let record = record_for("t");
        match invoker.invoke(&record).await {
            Outcome::Rollback(e) => assert!(e.to_string().contains("handler exploded")),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_error_is_propagated() {
        struct FatalHandler;
        #[async_trait]
        impl TimeoutHandler for FatalHandler {
            async fn on_timeout(&self, _id: &str, _info: &[u8]) -> Result<(), CallbackError> {
                Err(CallbackError::fatal(anyhow::anyhow!("data corrupted")))
            }
        }
        let invoker = invoker_with("t", Arc::new(FatalHandler));
        assert!(matches!(invoker.invoke(&record_for("t")).await, Outcome::Fatal(_)));
    }
}
