//! 자동매매 스케줄러 공용 코어.
//!
//! 거래소/전략/스케줄러 크레이트가 함께 사용하는 타입과 순수 함수 모음입니다.
//!
//! ```text
//! trader-core
//! ├── domain     // 포지션, 주문 기록, 인증 정보, 그리드 레벨, 실행 로그
//! ├── calendar   // 미국 증시 휴장일/조기폐장/다음 정산 시각 (KST ↔ ET)
//! ├── cache      // 키 기반 TTL 캐시
//! ├── tick_size  // 가격대별 호가 단위
//! └── decimal    // 센트 단위 반올림, 정수 주식 수량 계산
//! ```

pub mod cache;
pub mod calendar;
pub mod decimal;
pub mod domain;
pub mod tick_size;

pub use cache::TtlMap;
pub use calendar::{MarketCalendar, SettlementInfo, SkipReason, SkippedDay};
pub use domain::*;
pub use tick_size::{RoundMethod, TickSizeProvider, TieredTickSize};
