//! 공용 캐시 인프라.
//!
//! 프로세스 전역 변수 대신 명시적으로 주입되는 TTL 캐시를 제공합니다.
//! 테스트에서는 새 인스턴스를 만들거나 `clear()`로 초기화할 수 있습니다.
//!
//! # 구조
//!
//! ```text
//! TtlMap<K, V>     // 키 기반 TTL 캐시
//! ├── 시세 캐시        (ticker, exchange) → 현재가/전일종가, 수 초
//! └── 토큰 발급 쿨다운  user_id → 마지막 발급 시도 시각, 약 1분
//! ```

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

/// 캐시 내부 저장 항목.
struct TtlEntry<T> {
    data: T,
    created_at: Instant,
}

impl<T> TtlEntry<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

// ==================== TtlMap<K, V> ====================

/// 키 기반 TTL 캐시.
///
/// 항목별로 저장 시각을 기록하며, 만료된 항목은 조회 시 무시되고
/// `evict_expired()` 호출 시 실제로 제거됩니다.
pub struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, TtlEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// 지정된 TTL로 빈 맵 생성.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// 설정된 TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 유효한 값 조회.
    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.data.clone())
    }

    /// 값 저장 (저장 시각 갱신).
    pub async fn set(&self, key: K, value: V) {
        let mut guard = self.entries.write().await;
        guard.insert(
            key,
            TtlEntry {
                data: value,
                created_at: Instant::now(),
            },
        );
    }

    /// 유효한 항목이 있는지 확인.
    pub async fn contains(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// 항목의 남은 TTL. 없거나 만료되었으면 `None`.
    pub async fn remaining(&self, key: &K) -> Option<Duration> {
        let guard = self.entries.read().await;
        guard.get(key).and_then(|entry| {
            let elapsed = entry.created_at.elapsed();
            (elapsed < self.ttl).then(|| self.ttl - elapsed)
        })
    }

    /// 항목 제거.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.write().await;
        guard.remove(key).map(|entry| entry.data)
    }

    /// 만료된 항목 제거 후 제거 개수 반환.
    pub async fn evict_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        let ttl = self.ttl;
        guard.retain(|_, entry| entry.is_fresh(ttl));
        let evicted = before - guard.len();
        if evicted > 0 {
            tracing::debug!(evicted, "만료된 캐시 항목 제거");
        }
        evicted
    }

    /// 전체 초기화.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// 저장된 항목 수 (만료 항목 포함).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 비어있는지 확인.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K, V> fmt::Debug for TtlMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlMap").field("ttl", &self.ttl).finish()
    }
}
