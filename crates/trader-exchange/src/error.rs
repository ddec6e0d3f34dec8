//! 거래소 API 에러.

use thiserror::Error;

/// KIS 토큰 만료 응답 코드
pub const MSG_CD_TOKEN_EXPIRED: &str = "EGW00123";
/// KIS 유효하지 않은 토큰 응답 코드
pub const MSG_CD_TOKEN_INVALID: &str = "EGW00121";
/// KIS 토큰 발급 제한 (1분당 1회) 응답 코드
pub const MSG_CD_TOKEN_THROTTLED: &str = "EGW00133";
/// KIS 초당 호출 한도 초과 응답 코드
pub const MSG_CD_RATE_LIMITED: &str = "EGW00201";

/// 거래소 API 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 네트워크 오류 (연결 실패, 타임아웃, 5xx)
    #[error("네트워크 오류: {0}")]
    NetworkError(String),

    /// 접근 토큰 만료 (재발급 후 1회 재시도 대상)
    #[error("접근 토큰 만료: {0}")]
    AuthExpired(String),

    /// 인증 실패 (앱키/시크릿 오류)
    #[error("인증 실패: {0}")]
    Unauthorized(String),

    /// 토큰 발급 제한 (1분당 1회)
    #[error("토큰 발급 제한: {0}")]
    TokenIssuanceThrottled(String),

    /// 호출 한도 초과
    #[error("호출 한도 초과 ({retry_after_ms}ms 후 재시도)")]
    RateLimited { retry_after_ms: u64 },

    /// API 응답 오류 (rt_cd != "0")
    #[error("API 오류 [{code}]: {message}")]
    ApiError { code: String, message: String },

    /// 주문 거부 (수량/가격/잔고 등 주문 단위 검증 실패)
    #[error("주문 거부 [{code}]: {message}")]
    OrderRejected { code: String, message: String },

    /// 응답 파싱 실패
    #[error("응답 파싱 실패: {0}")]
    ParseError(String),

    /// 설정 오류
    #[error("설정 오류: {0}")]
    ConfigError(String),
}

impl ExchangeError {
    /// 토큰 재발급으로 복구 가능한 에러인지 확인.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired(_))
    }

    /// 재시도해도 결과가 바뀌지 않는 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::OrderRejected { .. } | Self::ConfigError(_)
        )
    }

    /// 백오프 재시도 대상 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::RateLimited { .. })
    }

    /// 에러가 지정한 재시도 대기 시간.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// KIS 응답 코드(`msg_cd`)를 에러로 분류.
    pub fn from_kis(msg_cd: &str, message: &str, is_order: bool) -> Self {
        match msg_cd {
            MSG_CD_TOKEN_EXPIRED | MSG_CD_TOKEN_INVALID => Self::AuthExpired(message.to_string()),
            MSG_CD_TOKEN_THROTTLED => Self::TokenIssuanceThrottled(message.to_string()),
            MSG_CD_RATE_LIMITED => Self::RateLimited {
                retry_after_ms: 1000,
            },
            _ if is_order => Self::OrderRejected {
                code: msg_cd.to_string(),
                message: message.to_string(),
            },
            _ => Self::ApiError {
                code: msg_cd.to_string(),
                message: message.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::ParseError(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}
