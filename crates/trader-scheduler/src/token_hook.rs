//! 재발급된 토큰을 인증 정보 저장소에 되돌려 쓰는 훅.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::{debug, warn};
use trader_exchange::TokenRefreshHook;
use uuid::Uuid;

use crate::store::CredentialStore;

/// 저장소 기반 토큰 갱신 훅
pub struct StoreTokenHook {
    credentials: Arc<dyn CredentialStore>,
}

impl StoreTokenHook {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl TokenRefreshHook for StoreTokenHook {
    async fn on_token_refreshed(
        &self,
        user_id: Uuid,
        access_token: &SecretString,
        expires_at: DateTime<Utc>,
    ) {
        match self
            .credentials
            .update_token(user_id, access_token, expires_at)
            .await
        {
            Ok(()) => debug!(user_id = %user_id, expires_at = %expires_at, "갱신 토큰 저장"),
            // 메모리 토큰은 유효하므로 이번 주기는 계속 진행
            Err(e) => warn!(user_id = %user_id, error = %e, "갱신 토큰 저장 실패"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use trader_core::Credential;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn refreshed_token_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store
            .insert_credential(Credential::new(user_id, "key", "secret", "1234567801", true))
            .await;

        let hook = StoreTokenHook::new(store.clone());
        let expires_at = Utc::now() + Duration::hours(24);
        hook.on_token_refreshed(user_id, &SecretString::from("new-token".to_string()), expires_at)
            .await;

        assert_eq!(store.token_expiry(user_id).await, Some(expires_at));
    }
}
