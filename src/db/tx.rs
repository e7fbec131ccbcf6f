//! 트랜잭션 재시도 헬퍼
//!
//! 동일 지갑 행을 건드리는 동시 쓰기는 SQLite 잠금 경합으로 실패할 수
//! 있습니다. 모든 쓰기 경로는 이 헬퍼를 통해 제한된 횟수만 재시도하고,
//! 소진 후에야 확정 오류를 상위로 올립니다.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::MarketError;

/// 최대 시도 횟수
const MAX_ATTEMPTS: u32 = 3;
/// 재시도 간 대기 시간
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// 잠금 경합 시 제한된 재시도로 쓰기 연산 실행
///
/// `make`는 호출될 때마다 새 트랜잭션을 시작하는 퓨처를 만들어야 합니다.
/// 일시적 오류(`MarketError::is_transient`)만 재시도하며, 비즈니스 오류는
/// 즉시 반환됩니다.
pub async fn with_tx_retry<T, Fut, F>(op_name: &str, mut make: F) -> Result<T, MarketError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MarketError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match make().await {
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    "{}: 잠금 경합으로 재시도 ({}/{})",
                    op_name, attempt, MAX_ATTEMPTS
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_business_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_tx_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(MarketError::InsufficientFunds {
                    required: 100,
                    available: 0,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = with_tx_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
