//! KIS OAuth 접근 토큰 관리.
//!
//! # 토큰 수명
//!
//! ```text
//! 저장된 토큰 (인증 정보 저장소)
//!   │  만료 10분 전까지 유효로 간주
//!   ▼
//! access_token() ── 유효 ──▶ 그대로 사용
//!   │ 만료/없음
//!   ▼
//! POST /oauth2/tokenP ──▶ 메모리 갱신 ──▶ TokenRefreshHook (저장소 동기화)
//! ```
//!
//! KIS는 토큰 발급을 1분에 1회로 제한합니다. 스케줄러는 사용자별 쿨다운으로
//! 연속 발급 시도를 막고, 이 모듈은 발급 제한 응답을
//! `ExchangeError::TokenIssuanceThrottled`로 돌려줍니다.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::KisConfig, ExchangeError};

/// 만료 판정 안전 여유 (분)
const TOKEN_SAFETY_BUFFER_MINUTES: i64 = 10;

/// 토큰 재발급 시 호출되는 콜백.
///
/// 메모리의 토큰과 저장소의 토큰을 일치시키기 위해 사용합니다.
#[async_trait]
pub trait TokenRefreshHook: Send + Sync {
    async fn on_token_refreshed(
        &self,
        user_id: Uuid,
        access_token: &SecretString,
        expires_at: DateTime<Utc>,
    );
}

/// 메모리 토큰.
#[derive(Clone)]
struct TokenState {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl TokenState {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::minutes(TOKEN_SAFETY_BUFFER_MINUTES) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    access_token_token_expired: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// 인증 정보 하나의 OAuth 상태.
pub struct KisOAuth {
    config: KisConfig,
    user_id: Uuid,
    http: Client,
    token: RwLock<Option<TokenState>>,
    hook: Option<Arc<dyn TokenRefreshHook>>,
}

impl KisOAuth {
    pub fn new(config: KisConfig, user_id: Uuid, http: Client) -> Self {
        Self {
            config,
            user_id,
            http,
            token: RwLock::new(None),
            hook: None,
        }
    }

    /// 저장소에 있던 토큰으로 초기화.
    pub fn with_token(self, access_token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: RwLock::new(Some(TokenState {
                access_token,
                expires_at,
            })),
            ..self
        }
    }

    /// 재발급 콜백 등록.
    pub fn with_hook(mut self, hook: Arc<dyn TokenRefreshHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &KisConfig {
        &self.config
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// 토큰이 있고 만료 10분 전보다 이전인지 확인.
    pub async fn is_token_valid(&self) -> bool {
        self.token
            .read()
            .await
            .as_ref()
            .is_some_and(|t| t.is_valid_at(Utc::now()))
    }

    /// 토큰 만료 시각.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.read().await.as_ref().map(|t| t.expires_at)
    }

    /// 유효한 접근 토큰 반환 (필요 시 발급).
    pub async fn access_token(&self) -> Result<String, ExchangeError> {
        {
            let guard = self.token.read().await;
            if let Some(state) = guard.as_ref().filter(|t| t.is_valid_at(Utc::now())) {
                return Ok(state.access_token.expose_secret().to_string());
            }
        }
        self.issue_token().await
    }

    /// 현재 토큰을 버리고 새로 발급.
    pub async fn reissue(&self) -> Result<String, ExchangeError> {
        self.token.write().await.take();
        self.issue_token().await
    }

    async fn issue_token(&self) -> Result<String, ExchangeError> {
        let mut guard = self.token.write().await;
        // 다른 태스크가 먼저 발급했으면 재사용
        if let Some(state) = guard.as_ref().filter(|t| t.is_valid_at(Utc::now())) {
            return Ok(state.access_token.expose_secret().to_string());
        }

        info!(
            user_id = %self.user_id,
            paper = self.config.environment.is_paper(),
            "KIS 접근 토큰 발급 요청"
        );

        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.config.app_key,
            "appsecret": self.config.app_secret(),
        });

        let response = self
            .http
            .post(self.config.url("/oauth2/tokenP"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() || payload.get("access_token").is_none() {
            let code = payload["error_code"].as_str().unwrap_or_default();
            let message = payload["error_description"]
                .as_str()
                .unwrap_or("토큰 발급 실패");
            warn!(user_id = %self.user_id, %status, code, message, "KIS 토큰 발급 실패");
            return Err(match ExchangeError::from_kis(code, message, false) {
                ExchangeError::ApiError { .. } if status.as_u16() == 401 => {
                    ExchangeError::Unauthorized(message.to_string())
                }
                other => other,
            });
        }

        let parsed: TokenResponse = serde_json::from_value(payload)
            .map_err(|e| ExchangeError::ParseError(format!("토큰 응답: {}", e)))?;
        let expires_at = token_expiry(&parsed, Utc::now());
        let access_token = SecretString::from(parsed.access_token);

        *guard = Some(TokenState {
            access_token: access_token.clone(),
            expires_at,
        });
        drop(guard);

        debug!(user_id = %self.user_id, %expires_at, "KIS 접근 토큰 발급 완료");

        if let Some(hook) = &self.hook {
            hook.on_token_refreshed(self.user_id, &access_token, expires_at)
                .await;
        }

        Ok(access_token.expose_secret().to_string())
    }

    /// 주문 본문 해시 (hashkey) 발급.
    pub async fn hashkey(&self, body: &Value) -> Result<String, ExchangeError> {
        let response = self
            .http
            .post(self.config.url("/uapi/hashkey"))
            .header("content-type", "application/json; charset=utf-8")
            .header("appkey", &self.config.app_key)
            .header("appsecret", self.config.app_secret())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExchangeError::NetworkError(format!(
                "hashkey 발급 실패: HTTP {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        payload["HASH"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::ParseError("hashkey 응답에 HASH 없음".to_string()))
    }
}

/// 토큰 만료 시각 계산 (`expires_in` 우선, 없으면 KST 만료 문자열).
fn token_expiry(parsed: &TokenResponse, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(secs) = parsed.expires_in.filter(|s| *s > 0) {
        return now + ChronoDuration::seconds(secs);
    }
    parsed
        .access_token_token_expired
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .and_then(|naive| Seoul.from_local_datetime(&naive).single())
        .map(|kst| kst.with_timezone(&Utc))
        .unwrap_or_else(|| now + ChronoDuration::hours(24))
}
