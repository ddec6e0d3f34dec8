//! 도메인 타입.
//!
//! - `position` - 추적 종목(포지션)과 전략별 파라미터
//! - `order` - 주문 기록과 상태 전이
//! - `credential` - 증권사 API 인증 정보 (읽기 전용)
//! - `grid` - 그리드 레벨
//! - `execution_log` - 스케줄러 실행 로그

/// 알 수 없는 문자열 값을 enum으로 변환하려 할 때의 에러.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("알 수 없는 {kind} 값: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// DB/로그 저장용 문자열 표현을 가진 enum 정의.
///
/// `as_str()`, `Display`, `FromStr`을 함께 생성합니다.
macro_rules! text_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// 저장용 문자열.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::domain::ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

pub mod credential;
pub mod execution_log;
pub mod grid;
pub mod order;
pub mod position;

pub use credential::Credential;
pub use execution_log::{ExecutionLog, JobType, LogStatus};
pub use grid::{GridLevel, GridLevelStatus, GridLevelType};
pub use order::{OrderKind, OrderRecord, OrderSide, OrderStateError, OrderStatus, OrderSubType};
pub use position::{
    BuyCondition, ExchangeCode, Position, PositionStatus, StrategyKind, VrParams, VrStyle,
};
