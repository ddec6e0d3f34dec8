use thiserror::Error;

/// 전략 계산 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// 잘못된 파라미터
    #[error("잘못된 전략 파라미터: {0}")]
    InvalidParameter(String),

    /// 전략 전용 파라미터 누락
    #[error("전략 파라미터 누락: {0}")]
    MissingParameters(&'static str),
}
