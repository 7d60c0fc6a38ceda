pub mod recovery;
pub mod retry;

pub use recovery::{RecoveryAction, RecoveryPolicy};
pub use retry::{RetryDecision, RetryPolicy};
