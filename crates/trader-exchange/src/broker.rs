//! 해외주식 브로커 추상화.
//!
//! 스케줄러는 구체 클라이언트 대신 [`OverseasBroker`] 트레이트로 거래소에 접근합니다.
//! 실제 구현은 [`crate::KisOverseasClient`], 테스트용 구현은 [`crate::MockBroker`]입니다.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{Credential, ExchangeCode, OrderKind, OrderSide};

use crate::ExchangeError;

/// 현재가 시세.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub exchange: ExchangeCode,
    /// 현재가 (장 마감 후에는 최종 체결가)
    pub price: Decimal,
    /// 전일 종가
    pub previous_close: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// 주문 요청.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub exchange: ExchangeCode,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub quantity: i64,
}

/// 주문 접수 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// 증권사 주문번호
    pub order_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// 체결 내역 한 건.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub filled_quantity: i64,
    pub filled_price: Decimal,
    pub filled_amount: Decimal,
    /// 미체결 잔량
    pub remaining_quantity: i64,
    pub filled_at: DateTime<Utc>,
}

/// 미체결 주문 한 건.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub order_quantity: i64,
    pub remaining_quantity: i64,
    pub price: Decimal,
}

/// 해외주식 브로커.
///
/// 모든 거래 호출은 토큰 만료 시 1회 재발급/재시도를 내부에서 처리합니다.
#[async_trait]
pub trait OverseasBroker: Send + Sync {
    /// 메모리 토큰이 안전 여유를 두고 유효한지 확인.
    async fn is_token_valid(&self) -> bool;

    /// 유효한 토큰 확보 (없으면 발급).
    async fn ensure_token(&self) -> Result<(), ExchangeError>;

    /// 현재가/전일 종가 조회.
    async fn get_price(&self, ticker: &str, exchange: ExchangeCode) -> Result<Quote, ExchangeError>;

    /// 부수 효과 없는 현재가 조회.
    ///
    /// 캐시에 있으면 그 값을 쓰고, 없으면 한 번 조회하되 캐시에 저장하지 않습니다.
    /// 토큰이 없거나 만료되면 재발급하지 않고 `AuthExpired`를 돌려줍니다.
    async fn peek_price(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
    ) -> Result<Quote, ExchangeError>;

    /// 주문 제출 (지정가 또는 LOC).
    async fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// 기간 내 체결 내역.
    async fn get_filled_orders(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FilledOrder>, ExchangeError>;

    /// 거래소별 미체결 내역.
    async fn get_pending_orders(
        &self,
        exchange: ExchangeCode,
    ) -> Result<Vec<PendingOrder>, ExchangeError>;

    /// 특정 일자 종가 (없으면 None).
    async fn get_daily_close(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, ExchangeError>;
}

/// 인증 정보로 브로커 세션을 만드는 팩토리.
///
/// 레이트 리미터와 시세 캐시는 팩토리가 소유하여 세션 간에 공유됩니다.
pub trait BrokerFactory: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn OverseasBroker>, ExchangeError>;
}
