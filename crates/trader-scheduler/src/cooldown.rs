//! 사용자별 토큰 발급 쿨다운.
//!
//! KIS 토큰 발급은 1분에 1회로 제한됩니다. 한 사용자에 대해 발급을 시도하면
//! 쿨다운이 끝날 때까지 같은 사용자의 재발급 시도를 막고, 해당 주기는 건너뜁니다.

use std::time::Duration;

use trader_core::TtlMap;
use uuid::Uuid;

/// 토큰 발급 쿨다운 맵
#[derive(Debug)]
pub struct TokenCooldown {
    entries: TtlMap<Uuid, ()>,
}

impl TokenCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            entries: TtlMap::new(cooldown),
        }
    }

    /// 쿨다운 중이면 남은 시간 반환.
    pub async fn active(&self, user_id: Uuid) -> Option<Duration> {
        self.entries.remaining(&user_id).await
    }

    /// 발급 시도를 기록 (쿨다운 시작).
    pub async fn start(&self, user_id: Uuid) {
        self.entries.set(user_id, ()).await;
    }

    /// 쿨다운 해제 (수동 초기화/테스트용).
    pub async fn reset(&self, user_id: Uuid) {
        self.entries.remove(&user_id).await;
    }

    /// 만료 항목 정리.
    pub async fn evict_expired(&self) -> usize {
        self.entries.evict_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooldown_blocks_until_expiry() {
        let cooldown = TokenCooldown::new(Duration::from_millis(50));
        let user = Uuid::new_v4();

        assert!(cooldown.active(user).await.is_none());
        cooldown.start(user).await;
        assert!(cooldown.active(user).await.is_some());
        assert!(cooldown.active(Uuid::new_v4()).await.is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cooldown.active(user).await.is_none());
    }
}
