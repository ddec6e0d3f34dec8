//! 메모리 기반 모의 브로커.
//!
//! 네트워크 없이 스케줄러/대사 로직을 검증하기 위한 구현입니다.
//! 시세, 체결/미체결 목록, 종가를 직접 주입하고 제출된 주문을 확인합니다.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use trader_core::{Credential, ExchangeCode, OrderSide};

use crate::{
    broker::{
        BrokerFactory, FilledOrder, OrderRequest, OverseasBroker, PendingOrder, PlacedOrder, Quote,
    },
    ExchangeError,
};

#[derive(Default)]
struct MockState {
    quotes: HashMap<String, Quote>,
    placed: Vec<(String, OrderRequest)>,
    filled: Vec<FilledOrder>,
    pending: Vec<PendingOrder>,
    closes: HashMap<(String, NaiveDate), Decimal>,
    rejected_tickers: HashSet<String>,
    rejected_buys: HashSet<String>,
    issuance_error: Option<ExchangeError>,
}

/// 모의 브로커.
pub struct MockBroker {
    state: Mutex<MockState>,
    token_valid: AtomicBool,
    token_issues: AtomicU32,
    price_calls: AtomicU32,
    next_order_no: AtomicU64,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            token_valid: AtomicBool::new(true),
            token_issues: AtomicU32::new(0),
            price_calls: AtomicU32::new(0),
            next_order_no: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // 테스트 패닉으로 poison 되어도 상태는 계속 사용
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 시세 설정.
    pub fn set_quote(&self, ticker: &str, price: Decimal, previous_close: Decimal) {
        self.lock().quotes.insert(
            ticker.to_string(),
            Quote {
                ticker: ticker.to_string(),
                exchange: ExchangeCode::Nasd,
                price,
                previous_close,
                fetched_at: Utc::now(),
            },
        );
    }

    /// 체결 내역 추가.
    pub fn add_fill(&self, fill: FilledOrder) {
        self.lock().filled.push(fill);
    }

    /// 미체결 내역 추가.
    pub fn add_pending(&self, pending: PendingOrder) {
        self.lock().pending.push(pending);
    }

    /// 일자별 종가 설정.
    pub fn set_close(&self, ticker: &str, date: NaiveDate, close: Decimal) {
        self.lock().closes.insert((ticker.to_string(), date), close);
    }

    /// 해당 종목 주문을 거부하도록 설정.
    pub fn reject_orders_for(&self, ticker: &str) {
        self.lock().rejected_tickers.insert(ticker.to_string());
    }

    /// 해당 종목 매수 주문만 거부하도록 설정.
    pub fn reject_buys_for(&self, ticker: &str) {
        self.lock().rejected_buys.insert(ticker.to_string());
    }

    /// 주문 거부 설정 모두 해제.
    pub fn clear_rejections(&self) {
        let mut state = self.lock();
        state.rejected_tickers.clear();
        state.rejected_buys.clear();
    }

    /// 토큰 유효 상태 설정.
    pub fn set_token_valid(&self, valid: bool) {
        self.token_valid.store(valid, Ordering::SeqCst);
    }

    /// 다음 토큰 발급을 지정 에러로 실패시킴.
    pub fn fail_token_issuance(&self, error: ExchangeError) {
        self.lock().issuance_error = Some(error);
    }

    /// 토큰 발급 횟수.
    pub fn token_issue_count(&self) -> u32 {
        self.token_issues.load(Ordering::SeqCst)
    }

    /// `get_price` 호출 횟수 (`peek_price` 제외).
    pub fn price_call_count(&self) -> u32 {
        self.price_calls.load(Ordering::SeqCst)
    }

    fn quote(&self, ticker: &str, exchange: ExchangeCode) -> Result<Quote, ExchangeError> {
        self.lock()
            .quotes
            .get(ticker)
            .cloned()
            .map(|quote| Quote { exchange, ..quote })
            .ok_or_else(|| ExchangeError::ApiError {
                code: "MOCK".to_string(),
                message: format!("{} 시세 없음", ticker),
            })
    }

    /// 제출된 주문 (주문번호, 요청).
    pub fn placed_orders(&self) -> Vec<(String, OrderRequest)> {
        self.lock().placed.clone()
    }
}

#[async_trait]
impl OverseasBroker for MockBroker {
    async fn is_token_valid(&self) -> bool {
        self.token_valid.load(Ordering::SeqCst)
    }

    async fn ensure_token(&self) -> Result<(), ExchangeError> {
        if self.token_valid.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(err) = self.lock().issuance_error.take() {
            return Err(err);
        }
        self.token_issues.fetch_add(1, Ordering::SeqCst);
        self.token_valid.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_price(&self, ticker: &str, exchange: ExchangeCode) -> Result<Quote, ExchangeError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.quote(ticker, exchange)
    }

    async fn peek_price(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
    ) -> Result<Quote, ExchangeError> {
        if !self.token_valid.load(Ordering::SeqCst) {
            return Err(ExchangeError::AuthExpired("모의 토큰 만료".to_string()));
        }
        self.quote(ticker, exchange)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let mut state = self.lock();
        let rejected_buy =
            request.side == OrderSide::Buy && state.rejected_buys.contains(&request.ticker);
        if rejected_buy || state.rejected_tickers.contains(&request.ticker) {
            return Err(ExchangeError::OrderRejected {
                code: "MOCK".to_string(),
                message: format!("{} 주문 거부", request.ticker),
            });
        }
        let order_id = format!("{:010}", self.next_order_no.fetch_add(1, Ordering::SeqCst));
        state.placed.push((order_id.clone(), request.clone()));
        Ok(PlacedOrder {
            order_id,
            accepted_at: Utc::now(),
        })
    }

    async fn get_filled_orders(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<FilledOrder>, ExchangeError> {
        Ok(self.lock().filled.clone())
    }

    async fn get_pending_orders(
        &self,
        _exchange: ExchangeCode,
    ) -> Result<Vec<PendingOrder>, ExchangeError> {
        Ok(self.lock().pending.clone())
    }

    async fn get_daily_close(
        &self,
        ticker: &str,
        _exchange: ExchangeCode,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, ExchangeError> {
        Ok(self.lock().closes.get(&(ticker.to_string(), date)).copied())
    }
}

/// 모든 인증 정보에 같은 모의 브로커를 돌려주는 팩토리.
pub struct MockBrokerFactory {
    broker: Arc<MockBroker>,
    connects: AtomicU32,
}

impl MockBrokerFactory {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        Self {
            broker,
            connects: AtomicU32::new(0),
        }
    }

    /// `connect` 호출 횟수.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl BrokerFactory for MockBrokerFactory {
    fn connect(&self, _credential: &Credential) -> Result<Arc<dyn OverseasBroker>, ExchangeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.broker.clone())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use trader_core::OrderKind;

    use super::*;

    #[tokio::test]
    async fn records_orders_and_rejects_configured_tickers() {
        let broker = MockBroker::new();
        broker.reject_orders_for("BAD");

        let mut request = OrderRequest {
            ticker: "TQQQ".into(),
            exchange: ExchangeCode::Nasd,
            side: OrderSide::Buy,
            kind: OrderKind::Loc,
            price: dec!(50),
            quantity: 2,
        };
        let placed = broker.place_order(&request).await.unwrap();
        assert_eq!(placed.order_id, "0000000001");

        request.ticker = "BAD".into();
        assert!(broker.place_order(&request).await.is_err());
        assert_eq!(broker.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn buy_rejection_leaves_sells_alone() {
        let broker = MockBroker::new();
        broker.reject_buys_for("SOXL");

        let mut request = OrderRequest {
            ticker: "SOXL".into(),
            exchange: ExchangeCode::Amex,
            side: OrderSide::Buy,
            kind: OrderKind::Loc,
            price: dec!(20),
            quantity: 1,
        };
        assert!(broker.place_order(&request).await.is_err());

        request.side = OrderSide::Sell;
        assert!(broker.place_order(&request).await.is_ok());

        broker.clear_rejections();
        request.side = OrderSide::Buy;
        assert!(broker.place_order(&request).await.is_ok());
        assert_eq!(broker.placed_orders().len(), 2);
    }

    #[tokio::test]
    async fn token_issuance_can_fail_once() {
        let broker = MockBroker::new();
        broker.set_token_valid(false);
        broker.fail_token_issuance(ExchangeError::TokenIssuanceThrottled("1분당 1회".into()));

        assert!(broker.ensure_token().await.is_err());
        assert!(broker.ensure_token().await.is_ok());
        assert_eq!(broker.token_issue_count(), 1);
        assert!(broker.is_token_valid().await);
    }
}
