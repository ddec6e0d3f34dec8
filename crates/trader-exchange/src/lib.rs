//! 한국투자증권(KIS) 해외주식 API 연동.
//!
//! ```text
//! trader-exchange
//! ├── broker     // OverseasBroker / BrokerFactory 트레이트, 요청/응답 타입
//! ├── client     // KisOverseasClient, KisBrokerFactory
//! ├── oauth      // 접근 토큰 발급/검증/재발급, hashkey
//! ├── config     // 실전/모의 환경, 계좌 분리
//! ├── tr_id      // 환경별 거래 ID
//! ├── rate_limit // 인증 정보별 호출 간격 제한
//! ├── retry      // 백오프 재시도, 토큰 만료 1회 재시도
//! └── mock       // 메모리 모의 브로커
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod oauth;
pub mod rate_limit;
pub mod retry;
pub mod tr_id;

pub use broker::{
    BrokerFactory, FilledOrder, OrderRequest, OverseasBroker, PendingOrder, PlacedOrder, Quote,
};
pub use client::{KisBrokerFactory, KisOverseasClient, PriceCache};
pub use config::{KisConfig, KisEnvironment};
pub use error::ExchangeError;
pub use mock::{MockBroker, MockBrokerFactory};
pub use oauth::{KisOAuth, TokenRefreshHook};
pub use rate_limit::KeyedRateLimiter;
pub use retry::{with_auth_retry, with_retry, RetryConfig};
