/// 一次触发的最终结果
///
/// 用显式的结果类型替代异常控制流：{成功, 可重试失败, 致命失败,
/// 目标不可用} 作为数据在调度器和执行器之间传递。
#[derive(Debug)]
pub enum Outcome {
    /// 事务已提交；调度器会清零重试计数并重新武装
    Success,

    /// 事务已回滚 (业务抛错、回调 Panic、或提交失败)
    /// 调度器按退避策略安排重试。
    Rollback(anyhow::Error),

    /// 回调声明的不可恢复失败；事务已回滚，定时器进入 Failed
    Fatal(anyhow::Error),

    /// 目标不可用 (Owner 已卸载)
    /// 既不算成功也不算可重试失败：本次到期被跳过，计划照常继续。
    TargetUnavailable,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}
