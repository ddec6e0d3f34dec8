//! KIS 접속 설정.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use trader_core::Credential;

/// 실전투자 REST 기본 URL
pub const REAL_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
/// 모의투자 REST 기본 URL
pub const PAPER_BASE_URL: &str = "https://openapivts.koreainvestment.com:29443";

/// 실전/모의 환경.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KisEnvironment {
    Real,
    Paper,
}

impl KisEnvironment {
    pub fn from_paper_flag(is_paper: bool) -> Self {
        if is_paper {
            Self::Paper
        } else {
            Self::Real
        }
    }

    pub fn is_paper(&self) -> bool {
        matches!(self, Self::Paper)
    }

    /// 환경별 기본 URL.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Real => REAL_BASE_URL,
            Self::Paper => PAPER_BASE_URL,
        }
    }

    /// 환경별 기본 호출 간격 (모의투자는 초당 2건 수준으로 제한됨).
    pub fn default_min_interval(&self) -> Duration {
        match self {
            Self::Real => Duration::from_millis(100),
            Self::Paper => Duration::from_millis(500),
        }
    }
}

/// 인증 정보 하나에 대한 클라이언트 설정.
#[derive(Clone)]
pub struct KisConfig {
    pub app_key: String,
    pub app_secret: SecretString,
    /// 계좌번호 앞 8자리
    pub account_prefix: String,
    /// 계좌 상품코드 2자리
    pub account_suffix: String,
    pub environment: KisEnvironment,
    /// 기본 URL (테스트에서 모의 서버로 교체)
    pub base_url: String,
    /// 레이트 리미터 키
    pub identity: String,
}

impl KisConfig {
    /// 인증 정보에서 설정 생성.
    pub fn from_credential(credential: &Credential) -> Self {
        let environment = KisEnvironment::from_paper_flag(credential.is_paper);
        Self {
            app_key: credential.app_key.clone(),
            app_secret: credential.app_secret.clone(),
            account_prefix: credential.account_prefix(),
            account_suffix: credential.account_suffix(),
            environment,
            base_url: environment.base_url().to_string(),
            identity: credential.identity(),
        }
    }

    /// 기본 URL 교체.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn app_secret(&self) -> &str {
        self.app_secret.expose_secret()
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl std::fmt::Debug for KisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisConfig")
            .field("app_key", &"***")
            .field("app_secret", &"***")
            .field("account_prefix", &"***")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .finish()
    }
}
