//! 存储调用退避重试
//! 仅针对 "resource busy" 类瞬时错误做有界指数退避；
//! 链上交易提交决不自动重试（重播已签名交易有双花风险）

use std::future::Future;

use anyhow::Result;
use tokio::time::sleep;

use crate::config::StorageRetryConfig;

/// 判断存储错误是否为可重试的瞬时错误
fn is_transient(err: &anyhow::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("busy")
        || message.contains("locked")
        || message.contains("timeout")
        || message.contains("temporarily unavailable")
}

/// 带退避重试执行存储操作
///
/// 非瞬时错误立即返回；瞬时错误按初始间隔翻倍退避，
/// 直到 `max_attempts` 耗尽后将最后一个错误返回给调用方
pub async fn with_backoff<T, F, Fut>(
    config: &StorageRetryConfig,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = config.initial_backoff;
    let mut last_err = None;

    for attempt in 1..=config.max_attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < config.max_attempts => {
                tracing::warn!(
                    op = label,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient storage error, retrying"
                );
                sleep(backoff).await;
                backoff *= 2;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("storage retry exhausted: {}", label)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn test_retry_config() -> StorageRetryConfig {
        StorageRetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&test_retry_config(), "unit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("database is busy"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&test_retry_config(), "unit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("constraint violation")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&test_retry_config(), "unit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("resource busy")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
