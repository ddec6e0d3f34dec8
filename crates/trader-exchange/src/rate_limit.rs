//! 인증 정보별 호출 간격 제한.
//!
//! KIS는 앱키 단위로 초당 호출 수를 제한합니다. 같은 인증 정보를 쓰는 모든
//! 전략 엔진이 하나의 리미터를 공유하도록 키(인증 정보 식별자)별로 다음
//! 호출 가능 시각을 예약합니다.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

/// 키별 최소 호출 간격 리미터.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl KeyedRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// 호출 슬롯을 예약하고 해당 시각까지 대기.
    ///
    /// 예약은 락 안에서, 대기는 락 밖에서 하므로 다른 키의 호출을 막지 않습니다.
    pub async fn acquire(&self, key: &str) {
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(key).copied().filter(|t| *t > now).unwrap_or(now);
            slots.insert(key.to_string(), slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            trace!(key, wait_ms = (slot - Instant::now()).as_millis() as u64, "호출 간격 대기");
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_per_key() {
        let limiter = KeyedRateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        limiter.acquire("a").await;
        limiter.acquire("a").await;
        limiter.acquire("a").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));

        // 다른 키는 즉시 통과
        let before = Instant::now();
        limiter.acquire("b").await;
        assert!(before.elapsed() < Duration::from_millis(10));
    }
}
