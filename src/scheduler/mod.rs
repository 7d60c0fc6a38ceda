pub mod core;
pub mod metrics;
pub mod pacemaker;

pub use self::core::TimerScheduler;
pub use metrics::SchedulerMetrics;
pub use pacemaker::{DispatchPacemaker, PacemakerEvent};
