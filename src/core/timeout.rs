//! 硬超时竞速
//!
//! 用 tokio::time::timeout 让操作与定时器竞速：定时器归 Timeout future 所有，
//! 无论成功、失败还是超时，函数返回时定时器随之释放，不会残留。

use std::future::Future;
use std::time::Duration;

use crate::core::{ErrorCode, ErrorRecord};

/// 单次请求的整体硬超时（4 分钟），低于宿主环境的请求寿命上限
pub const HARD_TIMEOUT: Duration = Duration::from_millis(240_000);

/// 以 timeout-agent 错误码竞速
pub async fn with_timeout<T, F>(operation: F, limit: Duration) -> Result<T, ErrorRecord>
where
    F: Future<Output = Result<T, ErrorRecord>>,
{
    with_timeout_as(ErrorCode::TimeoutAgent, operation, limit).await
}

/// 以指定的超时类错误码竞速（如 timeout-tool、sandbox-timeout）
pub async fn with_timeout_as<T, F>(
    code: ErrorCode,
    operation: F,
    limit: Duration,
) -> Result<T, ErrorRecord>
where
    F: Future<Output = Result<T, ErrorRecord>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = limit.as_millis() as u64;
            tracing::warn!(code = %code, timeout_ms, "operation timed out");
            Err(
                ErrorRecord::new(code, format!("operation timed out after {timeout_ms}ms"))
                    .with_metadata("timeout_ms", timeout_ms),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let start = Instant::now();
        let value = with_timeout(async { Ok::<_, ErrorRecord>(42) }, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, 42);
        // 计时器未被等待，时钟不前进
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out() {
        let start = Instant::now();
        let err = with_timeout(
            async {
                sleep(Duration::from_secs(60)).await;
                Ok::<_, ErrorRecord>(())
            },
            Duration::from_millis(250),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::TimeoutAgent);
        assert!(err.message().contains("250ms"));
        assert!(err.is_recoverable());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_error_passes_through() {
        let err = with_timeout(
            async { Err::<(), _>(ErrorRecord::new(ErrorCode::ModelApiError, "500")) },
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModelApiError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout_code() {
        let err = with_timeout_as(
            ErrorCode::TimeoutTool,
            std::future::pending::<Result<(), ErrorRecord>>(),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimeoutTool);
        assert_eq!(err.metadata()["timeout_ms"], 10);
    }

    #[test]
    fn test_hard_timeout_is_four_minutes() {
        assert_eq!(HARD_TIMEOUT, Duration::from_secs(240));
    }
}
