//! 有界重试与指数退避
//!
//! 重试判定是三态的：Retry（继续）/ FailFast（立即抛出）/ Exhausted（已是重试耗尽的错误，不得再重试）。
//! 任何重试链都有上限，最终失败一定以 ErrorRecord 形式返回，携带实际消耗的尝试次数。

use std::future::Future;
use std::time::Duration;

use crate::core::ErrorRecord;

/// 单次失败后的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    FailFast,
    /// 错误本身已经历过一轮重试，向上透传而不叠加重试
    Exhausted,
}

/// 重试策略：最多调用 max_retries 次，第 n 次失败后等待 base_delay * 2^n
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 第 attempt 次（从 0 开始）失败后的退避时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// 默认判定：已带重试次数的记录视为耗尽；不可恢复的错误快速失败；其余重试
pub fn default_classifier(err: &ErrorRecord) -> RetryDecision {
    if err.retry_count() > 0 {
        RetryDecision::Exhausted
    } else if err.is_recoverable() {
        RetryDecision::Retry
    } else {
        RetryDecision::FailFast
    }
}

/// 按默认判定重试，不挂回调
pub async fn retry_recoverable<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, ErrorRecord>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ErrorRecord>>,
{
    retry_with_backoff(policy, op, default_classifier, |_, _, _| {}).await
}

/// 带退避的有界重试
///
/// - `op` 接收当前尝试序号（从 0 开始）
/// - `should_retry` 返回 FailFast / Exhausted 时原样返回该错误，不再尝试
/// - `on_retry(attempt, &err, delay)` 在每次退避前调用
/// - 错误带有 retry_after 时，退避时长不低于该值
/// - 全部尝试失败后返回新的 ErrorRecord：沿用最后一次错误的错误码，cause 指向它，retry_count 为实际尝试次数
pub async fn retry_with_backoff<T, F, Fut, C, H>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: C,
    mut on_retry: H,
) -> Result<T, ErrorRecord>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ErrorRecord>>,
    C: Fn(&ErrorRecord) -> RetryDecision,
    H: FnMut(u32, &ErrorRecord, Duration),
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0u32;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match should_retry(&err) {
            RetryDecision::FailFast | RetryDecision::Exhausted => return Err(err),
            RetryDecision::Retry => {}
        }

        let attempts_made = attempt + 1;
        if attempts_made >= max_attempts {
            tracing::warn!(
                code = %err.code(),
                attempts = attempts_made,
                "retries exhausted: {}",
                err.message()
            );
            return Err(exhausted(err, attempts_made));
        }

        let delay = policy
            .delay_for(attempt)
            .max(err.retry_after().unwrap_or_default());
        on_retry(attempt, &err, delay);
        tokio::time::sleep(delay).await;
        attempt = attempts_made;
    }
}

fn exhausted(last: ErrorRecord, attempts: u32) -> ErrorRecord {
    let code = last.code();
    let message = format!("failed after {attempts} attempts: {}", last.message());
    ErrorRecord::new(code, message)
        .with_retry_count(attempts)
        .with_metadata("attempts", attempts)
        .with_cause(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn transient() -> ErrorRecord {
        ErrorRecord::new(ErrorCode::UpstreamConnectionError, "connection reset")
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_allowed_attempt() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(100));

        let value = retry_recoverable(&policy, move |_| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 4 {
                Err(transient())
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_calls_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let err = retry_recoverable(&policy, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ErrorRecord::new(ErrorCode::InvalidInput, "bad payload"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_cause() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let err = retry_recoverable(&policy, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.retry_count(), 3);
        assert_eq!(err.code(), ErrorCode::UpstreamConnectionError);
        assert_eq!(err.cause_chain()[0], "[upstream-connection-error] connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles() {
        let delays = Mutex::new(Vec::new());
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let start = Instant::now();

        let _ = retry_with_backoff(
            &policy,
            |_| async { Err::<(), _>(transient()) },
            default_classifier,
            |attempt, _, delay| delays.lock().unwrap().push((attempt, delay)),
        )
        .await;

        assert_eq!(
            *delays.lock().unwrap(),
            vec![
                (0, Duration::from_millis(100)),
                (1, Duration::from_millis(200)),
                (2, Duration::from_millis(400)),
            ]
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700) && elapsed < Duration::from_millis(720));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_a_floor_on_backoff() {
        let delays = Mutex::new(Vec::new());
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let _ = retry_with_backoff(
            &policy,
            |attempt| async move {
                let err = transient();
                if attempt == 0 {
                    Err::<(), _>(err.with_retry_after(Duration::from_secs(2)))
                } else {
                    Err(err.with_retry_after(Duration::from_millis(50)))
                }
            },
            default_classifier,
            |_, _, delay| delays.lock().unwrap().push(delay),
        )
        .await;

        assert_eq!(
            *delays.lock().unwrap(),
            vec![Duration::from_secs(2), Duration::from_millis(200)]
        );
        assert!(start.elapsed() >= Duration::from_millis(2_200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_error_is_not_retried_again() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let inner = transient().with_retry_count(3);

        let err = retry_recoverable(&policy, |_| {
            let inner = inner.clone();
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(inner) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.retry_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier_overrides_recoverable_flag() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let err = retry_with_backoff(
            &policy,
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            },
            |e| {
                if e.code() == ErrorCode::RateLimited {
                    RetryDecision::Retry
                } else {
                    RetryDecision::FailFast
                }
            },
            |_, _, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.code(), ErrorCode::UpstreamConnectionError);
    }

    #[test]
    fn test_zero_max_retries_still_attempts_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let calls = &AtomicU32::new(0);
        let result = rt.block_on(retry_recoverable(&policy, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        }));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
