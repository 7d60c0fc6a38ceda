pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod time;
pub mod traits;
pub(crate) mod utils;

// 导出配置
pub use config::{
    ExhaustedAction, InProgressPolicy, RecoveryConfig, RetryConfig, StoreConfig,
    TimerServiceConfig, WorkerConfig,
};

// 导出错误类型
pub use error::{Result, TimerError};

// 导出核心模型
pub use model::{RetryState, Schedule, TimerRecord, TimerSnapshot, TimerState};

// 导出事件通道
pub use events::{NoOpSink, TimerEvent, TimerEventSink, TracingEventSink};

// 导出协作方需实现的 Trait
pub use traits::{
    CallbackError, NoTransaction, TimeoutHandler, TransactionBoundary, TransactionHandle,
};

pub use time::TimeUtils;
// 内部工具的快捷访问
pub(crate) use utils::{calculate_backoff, new_timer_id};
