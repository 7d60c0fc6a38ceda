use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// 调度器核心指标
// 使用 Atomic 保证高并发下的计数性能
#[derive(Debug, Default, Serialize)]
pub struct SchedulerMetrics {
    // --- 瞬时状态 (Gauges) ---
    /// 当前处于事务中的触发数 (活跃并发数)
    pub active_invocations: AtomicUsize,

    // --- 累积计数 (Counters) ---
    /// 历史总成功触发数
    pub total_success: AtomicU64,

    /// 历史总回滚数
    pub total_rollbacks: AtomicU64,

    /// 历史总重试安排数
    pub total_retries: AtomicU64,

    /// 历史总重叠跳过数
    pub total_overlap_skips: AtomicU64,

    /// 历史总过期数
    pub total_expired: AtomicU64,
}

impl SchedulerMetrics {
    /// 增加活跃数 (进入事务)
    pub fn inc_active(&self) {
        self.active_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// 减少活跃数 (事务结束)
    pub fn dec_active(&self) {
        self.active_invocations.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_success(&self) {
        self.total_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rollback(&self) {
        self.total_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_overlap_skip(&self) {
        self.total_overlap_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_expired(&self) {
        self.total_expired.fetch_add(1, Ordering::Relaxed);
    }
}
