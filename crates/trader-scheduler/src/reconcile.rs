//! 주문 체결 대사.
//!
//! 로컬 `pending` 주문 기록을 증권사 체결/미체결 내역과 주문번호로 맞춰보고
//! 포지션 상태를 실제 체결값으로 바로잡습니다.
//!
//! ```text
//! pending 기록 (계좌별로 묶어 세션 1회)
//! ├── 체결 내역에 있음 (수량 > 0) → filled
//! │   ├── VR 사다리         → 풀/보유분 반영
//! │   ├── 낙관 반영된 매수   → 가정값 제거 후 실제값 대입
//! │   ├── 낙관 반영된 익절   → 실제 매도금으로 손익 재계산 (부분 체결분은 보유 복원)
//! │   └── 그 외             → 실제값 새로 반영 (매도는 평단 기준 손익)
//! ├── 미체결 내역에 있음      → 그대로 (체결 대기)
//! └── 둘 다 없음             → 만료 판정
//!     ├── 장 마감 후 LOC      → 즉시 unfilled
//!     ├── 그 외 LOC          → 2시간 경과 시 unfilled
//!     └── 그 외 주문          → 1일 경과 시 cancelled
//!     (낙관 반영분 되돌림, 종가 비교로 사유 기록)
//! ```
//!
//! 장중 대사는 LOC 기록도 함께 보지만, LOC 체결 내역은 장 마감 후에만 생기므로
//! 장중에는 2시간 넘게 증권사 어디에도 없는 LOC 주문만 만료 처리합니다.
//!
//! 읽기-계산-쓰기 구간은 [`jobs::run`](crate::jobs::run)의 엔진 잠금 안에서 실행됩니다.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use trader_core::{
    decimal::round2, ExchangeCode, JobType, LogStatus, MarketCalendar, OrderKind, OrderRecord,
    OrderSide, OrderStatus, OrderSubType, Position, PositionStatus,
};
use trader_exchange::{FilledOrder, OverseasBroker, PendingOrder};
use trader_strategy::{fills, value_rebalance};
use uuid::Uuid;

use crate::engine::{group_by_user, Engine};
use crate::error::{Result, SchedulerError};
use crate::notifier::Notification;
use crate::stats::BatchStats;
use crate::store::OrderFilter;

/// 장 마감 전 LOC 주문 만료 기준 (시간)
const LOC_EXPIRY_HOURS: i64 = 2;
/// 그 외 주문 만료 기준 (일)
const DEFAULT_EXPIRY_DAYS: i64 = 1;

/// 대사 주기.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// 장중 주기 실행 (LOC는 2시간 기준으로만 만료)
    Intraday,
    /// 장 마감 후 1회 (LOC 포함 전체, LOC 즉시 만료)
    PostClose,
}

impl ReconcileMode {
    /// 어디에도 없는 주문을 만료 처리할지 판정.
    pub fn is_expired(&self, record: &OrderRecord, now: DateTime<Utc>) -> bool {
        let age = now - record.created_at;
        match (self, record.kind) {
            (Self::PostClose, OrderKind::Loc) => true,
            (_, OrderKind::Loc) => age >= Duration::hours(LOC_EXPIRY_HOURS),
            (_, OrderKind::Limit) => age >= Duration::days(DEFAULT_EXPIRY_DAYS),
        }
    }
}

/// 기록 하나의 대사 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Filled {
        quantity: i64,
        price: Decimal,
        profit: Option<Decimal>,
    },
    Expired {
        status: OrderStatus,
        reason: String,
    },
    /// 미체결 내역에 있음
    Awaiting,
    /// 어디에도 없지만 만료 기준 전
    NotYetExpired,
}

fn same_order(a: &str, b: &str) -> bool {
    a.trim_start_matches('0') == b.trim_start_matches('0')
}

/// pending 주문 기록 전체 대사.
pub async fn run(engine: &Engine, mode: ReconcileMode, now: DateTime<Utc>) -> Result<BatchStats> {
    let started = Instant::now();
    let records: Vec<OrderRecord> = engine
        .positions()
        .list_orders(&OrderFilter::pending())
        .await?;

    let mut stats = BatchStats::new();
    if records.is_empty() {
        debug!(mode = ?mode, "대사할 주문 없음");
        stats.elapsed = started.elapsed();
        return Ok(stats);
    }

    // 포지션별로 묶기 (생성 순서 유지)
    let mut by_position: HashMap<Uuid, Vec<OrderRecord>> = HashMap::new();
    for record in records {
        by_position.entry(record.position_id).or_default().push(record);
    }

    let mut positions = Vec::with_capacity(by_position.len());
    for position_id in by_position.keys() {
        match engine.positions().get_position(*position_id).await? {
            Some(position) => positions.push(position),
            None => warn!(position_id = %position_id, "주문 기록의 포지션 없음"),
        }
    }
    positions.sort_by_key(|p| p.created_at);

    info!(
        mode = ?mode,
        positions = positions.len(),
        "체결 대사 시작"
    );

    let mut filled_total = 0usize;
    let mut expired_total = 0usize;
    for (user_id, group) in group_by_user(positions) {
        let batch: Vec<(Position, Vec<OrderRecord>)> = group
            .into_iter()
            .map(|p| {
                let records = by_position.remove(&p.id).unwrap_or_default();
                (p, records)
            })
            .collect();
        let account_stats = reconcile_account(engine, mode, now, user_id, batch).await;
        filled_total += account_stats.success_filled;
        expired_total += account_stats.success_expired;
        stats.merge(&account_stats.stats);
    }

    if filled_total + expired_total > 0 {
        engine.notify(Notification::info(
            "reconcile",
            "체결 대사",
            format!("체결 {}건, 만료 {}건", filled_total, expired_total),
        ));
    }

    stats.elapsed = started.elapsed();
    Ok(stats)
}

struct AccountStats {
    stats: BatchStats,
    success_filled: usize,
    success_expired: usize,
}

async fn reconcile_account(
    engine: &Engine,
    mode: ReconcileMode,
    now: DateTime<Utc>,
    user_id: Uuid,
    batch: Vec<(Position, Vec<OrderRecord>)>,
) -> AccountStats {
    let record_count: usize = batch.iter().map(|(_, r)| r.len()).sum();
    let mut result = AccountStats {
        stats: BatchStats {
            total: record_count,
            ..Default::default()
        },
        success_filled: 0,
        success_expired: 0,
    };

    let venue = match fetch_venue_state(engine, mode, now, user_id, &batch).await {
        Ok(venue) => venue,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "체결 내역 조회 실패");
            for (position, _) in &batch {
                engine
                    .logger()
                    .position_error(JobType::Reconcile, position.id, &e)
                    .await;
            }
            if e.is_skip() {
                result.stats.skipped += record_count;
            } else {
                result.stats.errors += record_count;
            }
            return result;
        }
    };

    for (mut position, records) in batch {
        for record in records {
            let order_id = record.order_id.clone().unwrap_or_default();
            match reconcile_record(engine, &venue, mode, now, &mut position, record).await {
                Ok(outcome) => {
                    let (status, message) = describe(&position, &order_id, &outcome);
                    match &outcome {
                        RecordOutcome::Filled { .. } => {
                            result.stats.success += 1;
                            result.success_filled += 1;
                        }
                        RecordOutcome::Expired { .. } => {
                            result.stats.success += 1;
                            result.success_expired += 1;
                        }
                        RecordOutcome::Awaiting | RecordOutcome::NotYetExpired => {
                            result.stats.skipped += 1;
                        }
                    }
                    engine
                        .logger()
                        .position(
                            JobType::Reconcile,
                            position.id,
                            status,
                            message,
                            Some(outcome_details(&order_id, &outcome)),
                        )
                        .await;
                }
                Err(e) => {
                    result.stats.errors += 1;
                    engine
                        .logger()
                        .position_error(JobType::Reconcile, position.id, &e)
                        .await;
                }
            }
        }
    }

    result
}

/// 한 계좌의 증권사 상태.
pub struct VenueState {
    pub broker: std::sync::Arc<dyn OverseasBroker>,
    pub filled: Vec<FilledOrder>,
    pub pending: Vec<PendingOrder>,
}

impl VenueState {
    fn find_fill(&self, order_id: &str) -> Option<&FilledOrder> {
        self.filled
            .iter()
            .find(|f| same_order(&f.order_id, order_id) && f.filled_quantity > 0)
    }

    fn is_pending(&self, order_id: &str) -> bool {
        self.pending.iter().any(|p| same_order(&p.order_id, order_id))
    }
}

async fn fetch_venue_state(
    engine: &Engine,
    mode: ReconcileMode,
    now: DateTime<Utc>,
    user_id: Uuid,
    batch: &[(Position, Vec<OrderRecord>)],
) -> Result<VenueState> {
    let broker = engine.open_session(user_id).await?;

    let end = MarketCalendar::us_trading_date(now);
    let start = batch
        .iter()
        .flat_map(|(_, records)| records.iter())
        .map(|r| MarketCalendar::us_trading_date(r.created_at))
        .min()
        .unwrap_or(end)
        .min(end);
    let filled = broker.get_filled_orders(start, end).await?;

    let mut exchanges: Vec<ExchangeCode> = Vec::new();
    for (position, _) in batch {
        if !exchanges.contains(&position.exchange) {
            exchanges.push(position.exchange);
        }
    }
    let mut pending = Vec::new();
    for exchange in exchanges {
        pending.extend(broker.get_pending_orders(exchange).await?);
    }

    debug!(
        user_id = %user_id,
        mode = ?mode,
        start = %start,
        end = %end,
        filled = filled.len(),
        pending = pending.len(),
        "증권사 체결/미체결 조회"
    );

    Ok(VenueState {
        broker,
        filled,
        pending,
    })
}

/// 기록 하나 대사. 변경이 있으면 기록과 포지션을 함께 저장합니다.
pub async fn reconcile_record(
    engine: &Engine,
    venue: &VenueState,
    mode: ReconcileMode,
    now: DateTime<Utc>,
    position: &mut Position,
    mut record: OrderRecord,
) -> Result<RecordOutcome> {
    if !record.is_pending() {
        return Ok(RecordOutcome::NotYetExpired);
    }
    let Some(order_id) = record.order_id.clone() else {
        return Err(SchedulerError::ReconciliationMismatch {
            order_id: record.id.to_string(),
            reason: "증권사 주문번호 없음".to_string(),
        });
    };

    if let Some(fill) = venue.find_fill(&order_id) {
        let ordered_quantity = record.quantity;
        let mut updated = position.clone();
        let profit = apply_fill(&mut updated, &record, fill)?;
        record.mark_filled(fill.filled_price, fill.filled_quantity, fill.filled_at)?;
        record.profit = profit;
        if fill.filled_quantity < ordered_quantity {
            record.note = Some(format!(
                "부분 체결 {}/{}주",
                fill.filled_quantity, ordered_quantity
            ));
        }
        engine
            .positions()
            .settle_order(&record, Some(&updated))
            .await?;
        *position = updated;
        return Ok(RecordOutcome::Filled {
            quantity: fill.filled_quantity,
            price: fill.filled_price,
            profit,
        });
    }

    if venue.is_pending(&order_id) {
        debug!(order_id = %order_id, "체결 대기 중");
        return Ok(RecordOutcome::Awaiting);
    }

    if !mode.is_expired(&record, now) {
        return Ok(RecordOutcome::NotYetExpired);
    }

    let status = match record.kind {
        OrderKind::Loc => OrderStatus::Unfilled,
        OrderKind::Limit => OrderStatus::Cancelled,
    };
    let reason = expiry_reason(engine, venue, mode, now, position, &record).await;

    let mut updated = position.clone();
    revert_optimistic(&mut updated, &record);
    record.mark_expired(status, reason.clone())?;
    engine
        .positions()
        .settle_order(&record, Some(&updated))
        .await?;
    *position = updated;

    Ok(RecordOutcome::Expired { status, reason })
}

/// 체결값을 포지션에 반영. 매도면 실현 손익 반환.
fn apply_fill(
    position: &mut Position,
    record: &OrderRecord,
    fill: &FilledOrder,
) -> Result<Option<Decimal>> {
    let actual_qty = fill.filled_quantity;
    let actual_amount = if fill.filled_amount > Decimal::ZERO {
        fill.filled_amount
    } else {
        round2(fill.filled_price * Decimal::from(actual_qty))
    };

    if matches!(
        record.sub_type,
        Some(OrderSubType::VrBuy) | Some(OrderSubType::VrSell)
    ) {
        return Ok(value_rebalance::apply_fill(
            position,
            record.side,
            actual_qty,
            actual_amount,
        )?);
    }

    let profit = match (record.side, record.optimistic) {
        (OrderSide::Buy, true) => {
            fills::substitute_buy(
                position,
                record.quantity,
                record.amount,
                actual_qty,
                actual_amount,
            );
            None
        }
        (OrderSide::Buy, false) => {
            fills::apply_buy(position, actual_qty, actual_amount);
            None
        }
        (OrderSide::Sell, true) => Some(settle_liquidation(
            position,
            record,
            actual_qty,
            actual_amount,
        )),
        (OrderSide::Sell, false) => Some(fills::apply_sell(position, actual_qty, actual_amount)),
    };
    position.touch();
    Ok(profit)
}

/// 낙관적으로 청산 처리된 익절 주문의 실제 체결 반영.
///
/// 일부만 체결되면 남은 수량을 원가 비율대로 보유분으로 되돌립니다.
fn settle_liquidation(
    position: &mut Position,
    record: &OrderRecord,
    actual_qty: i64,
    actual_amount: Decimal,
) -> Decimal {
    let cost_total = record.amount - record.profit.unwrap_or(Decimal::ZERO);
    let unsold = record.quantity - actual_qty;
    if unsold > 0 && record.quantity > 0 {
        let unsold_cost =
            round2(cost_total * Decimal::from(unsold) / Decimal::from(record.quantity));
        position.add_holdings(unsold, unsold_cost);
        position.current_round = record.round.unwrap_or(position.current_round);
        position.status = PositionStatus::Buying;
        round2(actual_amount - (cost_total - unsold_cost))
    } else {
        round2(actual_amount - cost_total)
    }
}

/// 만료된 주문의 낙관 반영분 되돌리기 (회차는 유지).
fn revert_optimistic(position: &mut Position, record: &OrderRecord) {
    if !record.optimistic {
        return;
    }
    match record.side {
        OrderSide::Buy => fills::revert_buy(position, record.quantity, record.amount),
        OrderSide::Sell => fills::restore_liquidation(position, record),
    }
    position.touch();
}

/// 종가와 비교해 만료 사유 작성 (종가 조회는 짧은 타임아웃, 실패해도 진행).
async fn expiry_reason(
    engine: &Engine,
    venue: &VenueState,
    mode: ReconcileMode,
    now: DateTime<Utc>,
    position: &Position,
    record: &OrderRecord,
) -> String {
    let header = match (mode, record.kind) {
        (ReconcileMode::PostClose, OrderKind::Loc) => "장 마감 LOC 미체결".to_string(),
        _ => format!(
            "만료 기준 경과 ({}시간)",
            (now - record.created_at).num_hours()
        ),
    };

    let date = MarketCalendar::us_trading_date(record.created_at);
    let close = tokio::time::timeout(
        engine.config().broker.aux_timeout(),
        venue
            .broker
            .get_daily_close(&position.ticker, position.exchange, date),
    )
    .await;

    let detail = match close {
        Ok(Ok(Some(close))) => match record.side {
            OrderSide::Buy if record.price < close => {
                format!("매수가 {} < 종가 {}: 가격 미도달", record.price, close)
            }
            OrderSide::Sell if record.price > close => {
                format!("매도가 {} > 종가 {}: 가격 미도달", record.price, close)
            }
            _ => format!(
                "주문가 {} / 종가 {}: 가격 조건 충족, 거부 또는 잔고 부족 추정",
                record.price, close
            ),
        },
        Ok(Ok(None)) => "종가 없음: 사유 불명".to_string(),
        Ok(Err(e)) => {
            debug!(error = %e, "종가 조회 실패");
            "종가 조회 실패: 사유 불명".to_string()
        }
        Err(_) => "종가 조회 시간 초과: 사유 불명".to_string(),
    };

    let reason = format!("{} - {}", header, detail);
    let mismatch = SchedulerError::ReconciliationMismatch {
        order_id: record.order_id.clone().unwrap_or_default(),
        reason: reason.clone(),
    };
    info!(ticker = %position.ticker, "{}", mismatch);
    reason
}

fn describe(position: &Position, order_id: &str, outcome: &RecordOutcome) -> (LogStatus, String) {
    match outcome {
        RecordOutcome::Filled {
            quantity,
            price,
            profit,
        } => {
            let profit = profit
                .map(|p| format!(", 손익 {}", p))
                .unwrap_or_default();
            (
                LogStatus::Completed,
                format!(
                    "{} 주문 {} 체결 {}주 @ {}{}",
                    position.ticker, order_id, quantity, price, profit
                ),
            )
        }
        RecordOutcome::Expired { status, reason } => (
            LogStatus::Completed,
            format!("{} 주문 {} {}: {}", position.ticker, order_id, status, reason),
        ),
        RecordOutcome::Awaiting => (
            LogStatus::Skipped,
            format!("{} 주문 {} 체결 대기 중", position.ticker, order_id),
        ),
        RecordOutcome::NotYetExpired => (
            LogStatus::Skipped,
            format!("{} 주문 {} 체결 내역 없음, 만료 기준 전", position.ticker, order_id),
        ),
    }
}

fn outcome_details(order_id: &str, outcome: &RecordOutcome) -> serde_json::Value {
    match outcome {
        RecordOutcome::Filled {
            quantity,
            price,
            profit,
        } => json!({
            "order_id": order_id,
            "outcome": "filled",
            "quantity": quantity,
            "price": price,
            "profit": profit,
        }),
        RecordOutcome::Expired { status, reason } => json!({
            "order_id": order_id,
            "outcome": status.as_str(),
            "reason": reason,
        }),
        RecordOutcome::Awaiting => json!({ "order_id": order_id, "outcome": "awaiting" }),
        RecordOutcome::NotYetExpired => json!({ "order_id": order_id, "outcome": "not_expired" }),
    }
}
