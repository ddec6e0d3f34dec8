//! 스케줄러 통합 테스트
//!
//! 메모리 저장소 + 모의 브로커로 작업 실행부터 체결 대사까지 검증합니다.
//!
//! ## 테스트 검증 항목
//! 1. 기본 전략 매수: 주문 제출, 낙관적 반영, 같은 거래일 재실행 시 건너뜀
//! 2. 작업 실행: 배치 시작/완료 로그, 포지션 변경 작업 직렬화
//! 3. 세션: 인증 정보 없음, 토큰 발급 제한/쿨다운 시 건너뜀, 계좌당 1회 발급
//! 4. 익절: 목표가 도달 시 전량 매도 + 청산 반영, 만료 시 보유분 복원
//! 5. LOC 분할: 매수 후 매도 순서, 보유분 없으면 매도 생략, 매도 하루 1회
//! 6. VR 사이클: 사다리 제출, V/풀 갱신, 주기 전 재실행 시 주문 없음
//! 7. 진단: 주문/토큰 발급/캐시/저장 없이 매수 가능 여부 설명
//! 8. 체결 대사: 실제 체결로 교체, LOC 만료 시 되돌리기, VR 풀 갱신

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trader_core::{
    Credential, ExchangeCode, JobType, LogStatus, OrderKind, OrderRecord, OrderSide, OrderStatus,
    OrderSubType, Position, PositionStatus, StrategyKind, VrParams,
};
use trader_exchange::{
    ExchangeError, FilledOrder, MockBroker, MockBrokerFactory, OverseasBroker,
};
use trader_scheduler::config::TradingConfig;
use trader_scheduler::{
    jobs, reconcile, Engine, JobKind, MemoryStore, PositionStore, ReconcileMode, SchedulerConfig,
};
use uuid::Uuid;

// ============================================================================
// 테스트 헬퍼
// ============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    broker: Arc<MockBroker>,
    factory: Arc<MockBrokerFactory>,
    engine: Engine,
}

fn harness() -> Harness {
    let config = SchedulerConfig {
        trading: TradingConfig {
            position_delay_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MockBroker::new());
    let factory = Arc::new(MockBrokerFactory::new(broker.clone()));
    let engine = Engine::new(
        config,
        store.clone(),
        store.clone(),
        store.clone(),
        factory.clone(),
    );
    Harness {
        store,
        broker,
        factory,
        engine,
    }
}

async fn with_credential(h: &Harness) -> Uuid {
    let user_id = Uuid::new_v4();
    h.store
        .insert_credential(Credential::new(
            user_id,
            "app-key",
            "app-secret",
            "12345678-01",
            true,
        ))
        .await;
    user_id
}

fn basic_position(user_id: Uuid, ticker: &str) -> Position {
    Position::new(
        user_id,
        ticker,
        ExchangeCode::Nasd,
        StrategyKind::Basic,
        dec!(100),
        10,
    )
}

fn fill(order_id: &str, ticker: &str, side: OrderSide, qty: i64, price: Decimal) -> FilledOrder {
    FilledOrder {
        order_id: order_id.to_string(),
        ticker: ticker.to_string(),
        side,
        filled_quantity: qty,
        filled_price: price,
        filled_amount: price * Decimal::from(qty),
        remaining_quantity: 0,
        filled_at: Utc::now(),
    }
}

async fn order_for(h: &Harness, position_id: Uuid) -> OrderRecord {
    h.store
        .orders()
        .await
        .into_iter()
        .find(|o| o.position_id == position_id)
        .expect("주문 기록 없음")
}

fn loc_position(user_id: Uuid) -> Position {
    Position::new(
        user_id,
        "SOXL",
        ExchangeCode::Amex,
        StrategyKind::LocSplit,
        dec!(100),
        40,
    )
}

async fn orders_for(h: &Harness, position_id: Uuid) -> Vec<OrderRecord> {
    h.store
        .orders()
        .await
        .into_iter()
        .filter(|o| o.position_id == position_id)
        .collect()
}

async fn position(h: &Harness, id: Uuid) -> Position {
    h.store
        .get_position(id)
        .await
        .unwrap()
        .expect("포지션 없음")
}

// ============================================================================
// 기본 전략 매수
// ============================================================================

#[tokio::test]
async fn basic_buy_places_limit_order_and_applies_optimistically() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));

    let stats = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();
    assert_eq!(stats.success, 1);
    assert_eq!(stats.orders_placed, 1);

    let placed = h.broker.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].1.kind, OrderKind::Limit);
    assert_eq!(placed[0].1.quantity, 2);

    let updated = position(&h, p.id).await;
    assert_eq!(updated.current_round, 1);
    assert_eq!(updated.total_quantity, 2);
    assert_eq!(updated.total_invested, dec!(100));

    let record = order_for(&h, p.id).await;
    assert!(record.optimistic);
    assert_eq!(record.status, OrderStatus::Pending);
    assert_eq!(record.order_id.as_deref(), Some("0000000001"));
}

#[tokio::test]
async fn second_buy_on_same_trading_day_is_skipped() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));

    jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();
    let stats = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.orders_placed, 0);
    assert_eq!(h.broker.placed_orders().len(), 1);
    assert_eq!(position(&h, p.id).await.current_round, 1);
}

// ============================================================================
// 작업 실행
// ============================================================================

#[tokio::test]
async fn job_run_writes_started_and_completed_batch_entries() {
    let h = harness();
    let user_id = with_credential(&h).await;
    h.store
        .upsert_position(&basic_position(user_id, "TQQQ"))
        .await
        .unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));

    jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();

    let logs = h.store.logs().await;
    let batch: Vec<_> = logs
        .iter()
        .filter(|l| l.position_id.is_none() && l.job_type == JobType::BasicBuy)
        .collect();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].status, LogStatus::Started);
    assert_eq!(batch[1].status, LogStatus::Completed);

    let details = batch[1].details.as_ref().expect("배치 통계 없음");
    assert_eq!(details["success"], 1);
    assert_eq!(details["orders_placed"], 1);
}

#[tokio::test]
async fn position_jobs_wait_for_engine_lock() {
    let h = harness();
    let held = h.engine.lock_positions().await;

    // 잠금을 잡고 있는 동안 익절 점검은 시작하지 못함
    let blocked = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        jobs::run(&h.engine, JobKind::PriceCheck),
    )
    .await;
    assert!(blocked.is_err());

    // 로그 정리는 잠금 대상 아님
    let prune = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        jobs::run(&h.engine, JobKind::LogPrune),
    )
    .await;
    assert!(prune.is_ok());

    assert!(!h
        .store
        .logs()
        .await
        .iter()
        .any(|l| l.job_type == JobType::PriceCheck));

    drop(held);
    jobs::run(&h.engine, JobKind::PriceCheck).await.unwrap();
    assert!(h
        .store
        .logs()
        .await
        .iter()
        .any(|l| l.job_type == JobType::PriceCheck && l.status == LogStatus::Started));
}

// ============================================================================
// 계좌 세션
// ============================================================================

#[tokio::test]
async fn missing_credential_skips_without_connecting() {
    let h = harness();
    let p = basic_position(Uuid::new_v4(), "SOXL");
    h.store.upsert_position(&p).await.unwrap();

    let stats = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(h.factory.connect_count(), 0);
    let logs = h.store.logs().await;
    assert!(logs
        .iter()
        .any(|l| l.position_id == Some(p.id) && l.status == LogStatus::Skipped));
}

#[tokio::test]
async fn throttled_issuance_starts_cooldown() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));
    h.broker.set_token_valid(false);
    h.broker
        .fail_token_issuance(ExchangeError::TokenIssuanceThrottled("EGW00133".to_string()));

    // 발급 시도 → 제한
    let first = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();
    assert_eq!(first.skipped, 1);
    assert!(h.engine.cooldown().active(user_id).await.is_some());

    // 쿨다운 중에는 발급 시도 없이 건너뜀
    let second = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(h.broker.token_issue_count(), 0);
    assert!(h.broker.placed_orders().is_empty());
}

#[tokio::test]
async fn expired_token_is_issued_once_per_account() {
    let h = harness();
    let user_id = with_credential(&h).await;
    for ticker in ["TQQQ", "SOXL"] {
        h.store
            .upsert_position(&basic_position(user_id, ticker))
            .await
            .unwrap();
        h.broker.set_quote(ticker, dec!(25), dec!(26));
    }
    h.broker.set_token_valid(false);

    let stats = jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();

    assert_eq!(stats.success, 2);
    assert_eq!(h.broker.token_issue_count(), 1);
    assert_eq!(h.factory.connect_count(), 1);
}

// ============================================================================
// 익절
// ============================================================================

#[tokio::test]
async fn take_profit_liquidates_and_restores_when_cancelled() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = basic_position(user_id, "TQQQ");
    p.add_holdings(2, dec!(100));
    p.current_round = 1;
    h.store.upsert_position(&p).await.unwrap();
    // 목표가 55 (평단 50, +10%)
    h.broker.set_quote("TQQQ", dec!(56), dec!(54));

    let stats = jobs::run(&h.engine, JobKind::PriceCheck).await.unwrap();
    assert_eq!(stats.orders_placed, 1);

    let liquidated = position(&h, p.id).await;
    assert_eq!(liquidated.status, PositionStatus::Completed);
    assert_eq!(liquidated.total_quantity, 0);

    let record = order_for(&h, p.id).await;
    assert_eq!(record.side, OrderSide::Sell);
    assert_eq!(record.sub_type, Some(OrderSubType::TakeProfit));
    assert_eq!(record.profit, Some(dec!(12)));

    // 이틀 뒤에도 체결/미체결 어디에도 없음 → 취소, 보유분 복원
    let later = Utc::now() + Duration::days(2);
    reconcile::run(&h.engine, ReconcileMode::PostClose, later)
        .await
        .unwrap();

    let restored = position(&h, p.id).await;
    assert_eq!(restored.status, PositionStatus::Buying);
    assert_eq!(restored.total_quantity, 2);
    assert_eq!(restored.total_invested, dec!(100));
    assert_eq!(restored.current_round, 1);
    assert_eq!(order_for(&h, p.id).await.status, OrderStatus::Cancelled);
}

// ============================================================================
// LOC 분할
// ============================================================================

#[tokio::test]
async fn loc_split_places_buys_before_sells() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = loc_position(user_id);
    // 10주 평단 40, T = 4 → LOC% 8
    p.add_holdings(10, dec!(400));
    p.current_round = 4;
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("SOXL", dec!(41), dec!(40));

    let stats = jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(stats.success, 1);
    assert_eq!(stats.orders_placed, 4);

    let placed: Vec<_> = h.broker.placed_orders().into_iter().map(|(_, r)| r).collect();
    let sides: Vec<_> = placed.iter().map(|r| r.side).collect();
    assert_eq!(
        sides,
        vec![OrderSide::Buy, OrderSide::Buy, OrderSide::Sell, OrderSide::Sell]
    );
    assert_eq!(placed[0].price, dec!(39.99));
    assert_eq!(placed[1].price, dec!(43.20));
    assert!(placed[..3].iter().all(|r| r.kind == OrderKind::Loc));
    assert_eq!(placed[3].kind, OrderKind::Limit);
    // 매도는 매수 반영 후 12주 기준: 1/4 = 3주, 나머지 9주
    assert_eq!(placed[2].quantity, 3);
    assert_eq!(placed[3].quantity, 9);

    // 매수만 낙관적으로 반영
    let updated = position(&h, p.id).await;
    assert_eq!(updated.total_quantity, 12);
    assert_eq!(updated.total_invested, dec!(483.19));
    assert_eq!(updated.current_round, 5);

    let records = orders_for(&h, p.id).await;
    assert_eq!(records.len(), 4);
    assert!(records
        .iter()
        .all(|r| r.status == OrderStatus::Pending && r.optimistic == (r.side == OrderSide::Buy)));
}

#[tokio::test]
async fn loc_split_skips_sells_for_flat_position_and_same_day_rerun() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = loc_position(user_id);
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("SOXL", dec!(20), dec!(20));

    jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();

    let placed = h.broker.placed_orders();
    assert_eq!(placed.len(), 2);
    assert!(placed.iter().all(|(_, r)| r.side == OrderSide::Buy));

    let updated = position(&h, p.id).await;
    assert_eq!(updated.total_quantity, 4);
    assert_eq!(updated.current_round, 1);

    // 같은 거래일 재실행: 매수 기록이 있으므로 아무 주문도 내지 않음
    let again = jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(h.broker.placed_orders().len(), 2);
    assert_eq!(position(&h, p.id).await, updated);
}

#[tokio::test]
async fn loc_split_rerun_after_failed_buys_does_not_repeat_sells() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = loc_position(user_id);
    p.add_holdings(10, dec!(400));
    p.current_round = 4;
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("SOXL", dec!(41), dec!(40));
    h.broker.reject_buys_for("SOXL");

    let first = jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(first.orders_placed, 2);
    assert_eq!(position(&h, p.id).await.current_round, 4);

    // 매수 거부 해제 후 재실행: 매수만 다시 시도
    h.broker.clear_rejections();
    let second = jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(second.orders_placed, 2);

    let placed = h.broker.placed_orders();
    let sells = placed.iter().filter(|(_, r)| r.side == OrderSide::Sell).count();
    let buys = placed.iter().filter(|(_, r)| r.side == OrderSide::Buy).count();
    assert_eq!(sells, 2);
    assert_eq!(buys, 2);
    assert_eq!(position(&h, p.id).await.current_round, 5);
}

// ============================================================================
// VR 사이클
// ============================================================================

#[tokio::test]
async fn vr_cycle_submits_ladder_and_persists_next_v() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = Position::new(
        user_id,
        "QLD",
        ExchangeCode::Amex,
        StrategyKind::ValueRebalance,
        Decimal::ZERO,
        0,
    )
    .with_vr(VrParams {
        v: dec!(1000),
        pool: dec!(200),
        ..Default::default()
    });
    p.add_holdings(10, dec!(900));
    h.store.upsert_position(&p).await.unwrap();

    // V 1020, 밴드 867 ~ 1173, 매수 예산 100
    let stats = jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(stats.orders_placed, 10);

    let placed: Vec<_> = h.broker.placed_orders().into_iter().map(|(_, r)| r).collect();
    assert!(placed.iter().all(|r| r.kind == OrderKind::Limit && r.quantity == 1));
    assert_eq!(placed[0].side, OrderSide::Buy);
    assert_eq!(placed[0].price, dec!(86.70));
    assert_eq!(placed.iter().filter(|r| r.side == OrderSide::Sell).count(), 9);

    // 사다리는 체결 전까지 보유분에 반영하지 않음
    let updated = position(&h, p.id).await;
    assert_eq!(updated.total_quantity, 10);
    let vr = updated.vr.expect("VR 파라미터 없음");
    assert_eq!(vr.v, dec!(1020));
    assert_eq!(vr.pool, dec!(200));
    assert!(vr.last_cycle_at.is_some());

    let records = orders_for(&h, p.id).await;
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| !r.optimistic
        && matches!(r.sub_type, Some(OrderSubType::VrBuy) | Some(OrderSubType::VrSell))));

    // 주기 전 재실행: 주문 없음
    jobs::run(&h.engine, JobKind::LocBuy).await.unwrap();
    assert_eq!(h.broker.placed_orders().len(), 10);
}

// ============================================================================
// 진단
// ============================================================================

#[tokio::test]
async fn diagnostics_explain_without_side_effects() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));

    // 2024-07-01 (월) 10:00 EDT
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap();
    let results = jobs::diagnostics::diagnose(&h.engine, None, now)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].can_buy);
    assert!(results[0].blockers().is_empty());

    assert!(h.broker.placed_orders().is_empty());
    assert_eq!(h.broker.token_issue_count(), 0);
    assert_eq!(h.broker.price_call_count(), 0);
    assert!(h.store.orders().await.is_empty());
    assert!(h.store.logs().await.is_empty());
    assert_eq!(position(&h, p.id).await, p);
}

#[tokio::test]
async fn diagnostics_report_blockers_without_issuing_token() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));
    h.broker.set_token_valid(false);

    // 2024-07-04 독립기념일
    let holiday = Utc.with_ymd_and_hms(2024, 7, 4, 14, 0, 0).unwrap();
    let results = jobs::diagnostics::diagnose(&h.engine, Some(p.id), holiday)
        .await
        .unwrap();

    let blockers: Vec<&str> = results[0].blockers().iter().map(|c| c.name).collect();
    assert!(!results[0].can_buy);
    assert_eq!(blockers, vec!["market_open", "token"]);
    assert_eq!(h.broker.token_issue_count(), 0);
    assert!(!h.broker.is_token_valid().await);
    assert!(h.engine.cooldown().active(user_id).await.is_none());
}

// ============================================================================
// 체결 대사
// ============================================================================

#[tokio::test]
async fn fill_replaces_optimistic_buy_and_second_pass_is_noop() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = basic_position(user_id, "TQQQ");
    h.store.upsert_position(&p).await.unwrap();
    h.broker.set_quote("TQQQ", dec!(50), dec!(51));
    jobs::run(&h.engine, JobKind::BasicBuy).await.unwrap();

    // 증권사는 앞자리 0 없이 돌려줄 수 있음
    h.broker
        .add_fill(fill("1", "TQQQ", OrderSide::Buy, 2, dec!(49.5)));

    let stats = jobs::run(&h.engine, JobKind::Reconcile).await.unwrap();
    assert_eq!(stats.success, 1);

    let updated = position(&h, p.id).await;
    assert_eq!(updated.total_quantity, 2);
    assert_eq!(updated.total_invested, dec!(99));
    assert_eq!(updated.avg_price, dec!(49.5));
    assert_eq!(updated.current_round, 1);

    let record = order_for(&h, p.id).await;
    assert_eq!(record.status, OrderStatus::Filled);
    assert_eq!(record.price, dec!(49.5));
    assert!(record.filled_at.is_some());

    let again = jobs::run(&h.engine, JobKind::Reconcile).await.unwrap();
    assert_eq!(again.total, 0);
    assert_eq!(position(&h, p.id).await.total_invested, dec!(99));
}

#[tokio::test]
async fn post_close_expires_loc_but_keeps_fresh_limit_pending() {
    let h = harness();
    let user_id = with_credential(&h).await;

    let mut loc = Position::new(
        user_id,
        "SOXL",
        ExchangeCode::Amex,
        StrategyKind::LocSplit,
        dec!(100),
        40,
    );
    loc.add_holdings(2, dec!(100));
    loc.current_round = 1;
    let loc_record = OrderRecord::pending(loc.id, OrderSide::Buy, OrderKind::Loc, dec!(50), 2)
        .with_round(1)
        .with_order_id("0000000077")
        .with_optimistic(true);
    h.store
        .save_position_with_orders(&loc, std::slice::from_ref(&loc_record))
        .await
        .unwrap();

    let mut basic = basic_position(user_id, "TQQQ");
    basic.add_holdings(5, dec!(100));
    basic.current_round = 1;
    let limit_record =
        OrderRecord::pending(basic.id, OrderSide::Buy, OrderKind::Limit, dec!(20), 5)
            .with_round(1)
            .with_order_id("0000000078")
            .with_optimistic(true);
    h.store
        .save_position_with_orders(&basic, std::slice::from_ref(&limit_record))
        .await
        .unwrap();

    let stats = jobs::run(&h.engine, JobKind::ReconcileClose).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.skipped, 1);

    let expired = order_for(&h, loc.id).await;
    assert_eq!(expired.status, OrderStatus::Unfilled);
    assert!(expired.note.is_some());

    // 낙관 반영 취소, 회차는 유지
    let reverted = position(&h, loc.id).await;
    assert_eq!(reverted.total_quantity, 0);
    assert_eq!(reverted.total_invested, Decimal::ZERO);
    assert_eq!(reverted.current_round, 1);

    assert_eq!(order_for(&h, basic.id).await.status, OrderStatus::Pending);
    assert_eq!(position(&h, basic.id).await.total_quantity, 5);
}

#[tokio::test]
async fn intraday_pass_keeps_fresh_loc_pending() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let p = loc_position(user_id);
    let record = OrderRecord::pending(p.id, OrderSide::Buy, OrderKind::Loc, dec!(50), 2)
        .with_order_id("0000000005");
    h.store
        .save_position_with_orders(&p, std::slice::from_ref(&record))
        .await
        .unwrap();

    let stats = jobs::run(&h.engine, JobKind::Reconcile).await.unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(order_for(&h, p.id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn intraday_pass_expires_loc_absent_for_two_hours() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = loc_position(user_id);
    p.add_holdings(2, dec!(100));
    p.current_round = 1;
    let mut record = OrderRecord::pending(p.id, OrderSide::Buy, OrderKind::Loc, dec!(50), 2)
        .with_round(1)
        .with_order_id("0000000006")
        .with_optimistic(true);
    record.created_at = Utc::now() - Duration::hours(3);
    h.store
        .save_position_with_orders(&p, std::slice::from_ref(&record))
        .await
        .unwrap();

    let stats = reconcile::run(&h.engine, ReconcileMode::Intraday, Utc::now())
        .await
        .unwrap();
    assert_eq!(stats.success, 1);

    let expired = order_for(&h, p.id).await;
    assert_eq!(expired.status, OrderStatus::Unfilled);

    let reverted = position(&h, p.id).await;
    assert_eq!(reverted.total_quantity, 0);
    assert_eq!(reverted.total_invested, Decimal::ZERO);
    assert_eq!(reverted.current_round, 1);
}

#[tokio::test]
async fn vr_ladder_fill_moves_cash_pool() {
    let h = harness();
    let user_id = with_credential(&h).await;
    let mut p = Position::new(
        user_id,
        "QLD",
        ExchangeCode::Amex,
        StrategyKind::ValueRebalance,
        Decimal::ZERO,
        0,
    );
    p.vr = Some(VrParams {
        pool: dec!(1000),
        ..Default::default()
    });
    let record = OrderRecord::pending(p.id, OrderSide::Buy, OrderKind::Limit, dec!(30), 3)
        .with_sub_type(OrderSubType::VrBuy)
        .with_order_id("0000000090");
    h.store
        .save_position_with_orders(&p, std::slice::from_ref(&record))
        .await
        .unwrap();
    h.broker
        .add_fill(fill("0000000090", "QLD", OrderSide::Buy, 3, dec!(30)));

    let stats = reconcile::run(&h.engine, ReconcileMode::Intraday, Utc::now())
        .await
        .unwrap();
    assert_eq!(stats.success, 1);

    let updated = position(&h, p.id).await;
    assert_eq!(updated.total_quantity, 3);
    assert_eq!(updated.total_invested, dec!(90));
    assert_eq!(updated.vr.map(|v| v.pool), Some(dec!(910)));
}
