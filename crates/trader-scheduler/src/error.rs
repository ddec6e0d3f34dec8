//! 에러 타입 정의.

use thiserror::Error;
use trader_core::OrderStateError;
use trader_exchange::ExchangeError;
use trader_strategy::StrategyError;
use uuid::Uuid;

/// 저장소 에러
#[derive(Debug, Error)]
pub enum StoreError {
    /// 데이터베이스 에러
    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),

    /// 저장된 값 변환 실패
    #[error("저장 데이터 변환 실패: {0}")]
    Decode(String),

    /// 대상 없음
    #[error("{kind} 없음: {id}")]
    NotFound { kind: &'static str, id: Uuid },
}

/// 스케줄러 에러 타입
///
/// 포지션 단위 에러는 배치를 중단하지 않습니다. [`SchedulerError::is_skip`]이 참이면
/// 실행 로그에 `skipped`로, 아니면 `error`로 기록합니다.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 인증 정보 없음 (포지션 건너뜀)
    #[error("인증 정보 없음 (user_id={0})")]
    CredentialMissing(Uuid),

    /// 토큰 발급 제한/쿨다운 (다음 주기에 재시도)
    #[error("토큰 발급 제한: {0}")]
    TokenIssuanceThrottled(String),

    /// 토큰 만료 (재발급 후 재시도도 실패)
    #[error("토큰 만료: {0}")]
    TokenExpired(String),

    /// 주문 거부 (포지션 상태 변경 없음)
    #[error("주문 거부: {0}")]
    VenueRejected(String),

    /// 네트워크/API 오류 (다음 주기에 재시도)
    #[error("네트워크 오류: {0}")]
    Network(String),

    /// 만료 기준 경과 후에도 증권사에 없는 주문
    #[error("주문 대사 불일치 (order_id={order_id}): {reason}")]
    ReconciliationMismatch { order_id: String, reason: String },

    /// 저장소 에러
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 전략 계산 에러
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// 주문 상태 전이 에러
    #[error(transparent)]
    OrderState(#[from] OrderStateError),

    /// 설정 에러
    #[error("설정 오류: {0}")]
    Config(String),

    /// 스케줄 등록 에러
    #[error("스케줄 등록 실패: {0}")]
    Scheduling(String),
}

impl SchedulerError {
    /// 에러가 아닌 "건너뜀"으로 기록할 결과인지 확인.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::CredentialMissing(_) | Self::TokenIssuanceThrottled(_)
        )
    }
}

impl From<ExchangeError> for SchedulerError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::TokenIssuanceThrottled(msg) => Self::TokenIssuanceThrottled(msg),
            ExchangeError::AuthExpired(msg) | ExchangeError::Unauthorized(msg) => {
                Self::TokenExpired(msg)
            }
            ExchangeError::OrderRejected { code, message } => {
                Self::VenueRejected(format!("[{}] {}", code, message))
            }
            ExchangeError::ConfigError(msg) => Self::Config(msg),
            other @ (ExchangeError::NetworkError(_)
            | ExchangeError::RateLimited { .. }
            | ExchangeError::ApiError { .. }
            | ExchangeError::ParseError(_)) => Self::Network(other.to_string()),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SchedulerError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduling(err.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, SchedulerError>;
