//! 거래소 API 재시도 유틸리티.
//!
//! 두 가지 래퍼를 제공합니다.
//!
//! - [`with_retry`]: 네트워크 오류/호출 한도 초과에 대한 지수 백오프 재시도.
//!   멱등한 조회(GET)에만 사용합니다. 주문은 중복 제출 위험 때문에 감싸지 않습니다.
//! - [`with_auth_retry`]: 토큰 만료 응답 시 토큰을 한 번 갱신하고 정확히 한 번만
//!   다시 시도합니다. 두 번째 실패는 그대로 전파됩니다.
//!
//! ```rust,ignore
//! let quote = with_auth_retry(
//!     || with_retry(&RetryConfig::fast(), || client.fetch_price(ticker, exchange)),
//!     || async { oauth.reissue().await.map(|_| ()) },
//! )
//! .await?;
//! ```

use std::{future::Future, time::Duration};

use tracing::{debug, warn};

use crate::ExchangeError;

/// 재시도 설정.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 횟수 (초기 시도 제외).
    pub max_retries: u32,
    /// 기본 대기 시간 (에러에 지정된 대기 시간이 없을 때 사용).
    pub base_delay: Duration,
    /// 최대 대기 시간.
    pub max_delay: Duration,
    /// 백오프 배수.
    pub backoff_multiplier: f64,
    /// 지터(±25%) 추가 여부.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// 시세 조회용 (짧은 지연, 적은 재시도).
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// 재시도 없음 (단일 시도).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// `attempt`번째 재시도 전 대기 시간.
    fn delay_for(&self, attempt: u32, error: &ExchangeError) -> Duration {
        let base = error
            .retry_delay_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.base_delay);

        let scaled = base.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(scaled).min(self.max_delay);

        if !self.add_jitter {
            return delay;
        }
        let millis = delay.as_millis() as f64;
        let jitter = (unit_noise() * 2.0 - 1.0) * millis * 0.25;
        Duration::from_millis((millis + jitter).max(0.0) as u64)
    }
}

/// 시스템 시각 나노초 기반 0.0 ~ 1.0 값.
fn unit_noise() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / 1_000_000_000.0
}

/// 일시적 오류에 대해 백오프 재시도.
///
/// 치명적 에러(`is_fatal`)나 재시도 대상이 아닌 에러는 즉시 반환합니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "재시도 후 성공");
                }
                return Ok(value);
            }
            Err(e) if e.is_fatal() || !e.is_retryable() => return Err(e),
            Err(e) if attempt >= config.max_retries => {
                warn!(error = %e, attempts = attempt + 1, "최대 재시도 횟수 초과");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt, &e);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "재시도 대기 중"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// 토큰 만료 시 1회 갱신 후 1회 재시도.
///
/// `refresh`는 토큰 재발급과 저장소 동기화 콜백을 수행해야 합니다.
/// 갱신 실패나 재시도 실패는 그대로 반환합니다.
pub async fn with_auth_retry<T, F, Fut, R, RFut>(operation: F, refresh: R) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<(), ExchangeError>>,
{
    match operation().await {
        Err(e) if e.is_auth_expired() => {
            warn!(error = %e, "접근 토큰 만료 응답, 재발급 후 1회 재시도");
            refresh().await?;
            operation().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn quick() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            add_jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_network_errors_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = with_retry(&quick(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExchangeError::NetworkError("연결 실패".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn order_rejection_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = with_retry(&quick(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ExchangeError::OrderRejected {
                    code: "APBK0918".into(),
                    message: "주문가능금액 부족".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_retry_refreshes_once_and_retries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let refreshes = Arc::new(AtomicU32::new(0));

        let result = with_auth_retry(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ExchangeError::AuthExpired("만료".into()))
                    } else {
                        Ok("ok")
                    }
                }
            },
            || {
                let refreshes = refreshes.clone();
                async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_retry_propagates_second_expiry() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = with_auth_retry(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ExchangeError::AuthExpired("만료".into()))
                }
            },
            || async { Ok(()) },
        )
        .await;

        assert!(result.unwrap_err().is_auth_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_retry_ignores_other_errors() {
        let refreshed = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_auth_retry(
            || async { Err(ExchangeError::NetworkError("timeout".into())) },
            || {
                let refreshed = refreshed.clone();
                async move {
                    refreshed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;

        assert!(matches!(result, Err(ExchangeError::NetworkError(_))));
        assert_eq!(refreshed.load(Ordering::SeqCst), 0);
    }
}
