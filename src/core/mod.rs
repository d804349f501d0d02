//! 核心层：错误码与错误记录、有界重试、硬超时

pub mod error;
pub mod recovery;
pub mod timeout;

pub use error::{is_error_record, ErrorCode, ErrorRecord};
pub use recovery::{
    default_classifier, retry_recoverable, retry_with_backoff, RetryDecision, RetryPolicy,
};
pub use timeout::{with_timeout, with_timeout_as, HARD_TIMEOUT};
