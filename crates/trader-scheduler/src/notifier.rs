//! 알림 전송.
//!
//! 매매 코드는 알림을 기다리지 않습니다. [`spawn_notify`]로 백그라운드 태스크에
//! 넘기고 바로 다음 포지션으로 진행합니다. 전송 실패는 경고 로그만 남깁니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 알림 에러
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("네트워크 오류: {0}")]
    Network(#[from] reqwest::Error),

    #[error("요청 한도 초과 ({0}초 후 재시도)")]
    RateLimited(u64),

    #[error("전송 실패: {0}")]
    SendFailed(String),
}

/// 알림 수준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// 알림 메시지
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotifyLevel,
    pub title: String,
    pub body: String,
    /// 분류 태그 (예: "basic_buy", "reconcile")
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Notification {
    pub fn info(tag: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotifyLevel::Info,
            title: title.into(),
            body: body.into(),
            tag: tag.into(),
            metadata: None,
        }
    }

    pub fn error(tag: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotifyLevel::Error,
            ..Self::info(tag, title, body)
        }
    }

    pub fn with_level(mut self, level: NotifyLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 알림 전송기
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// 로그로만 남기는 전송기 (웹훅 미설정 시 기본값).
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.level {
            NotifyLevel::Info => info!(
                tag = %notification.tag,
                title = %notification.title,
                "{}",
                notification.body
            ),
            NotifyLevel::Warning | NotifyLevel::Error => warn!(
                tag = %notification.tag,
                title = %notification.title,
                "{}",
                notification.body
            ),
        }
        Ok(())
    }
}

/// JSON 웹훅 전송기 (Slack Incoming Webhook 호환 `text` 필드 포함).
pub struct WebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url: webhook_url.into(),
            client,
        }
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        let prefix = match notification.level {
            NotifyLevel::Info => "ℹ️",
            NotifyLevel::Warning => "⚠️",
            NotifyLevel::Error => "🚨",
        };
        json!({
            "text": format!("{} *{}*\n{}", prefix, notification.title, notification.body),
            "level": notification.level,
            "tag": notification.tag,
            "metadata": notification.metadata,
        })
    }

    async fn send_webhook(&self, payload: serde_json::Value) -> Result<(), NotifyError> {
        debug!("웹훅 알림 전송");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            return Err(NotifyError::RateLimited(60));
        }

        Err(NotifyError::SendFailed(format!("HTTP {}: {}", status, body)))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.send_webhook(Self::payload(notification)).await
    }
}

/// 알림을 백그라운드로 전송 (결과를 기다리지 않음).
pub fn spawn_notify(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(tag = %notification.tag, error = %e, "알림 전송 실패");
        }
    });
}
