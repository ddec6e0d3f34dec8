//! LOC 분할 일일 사이클.
//!
//! 한 포지션 안에서 매수 주문을 먼저 제출하고, 그 다음 매도 주문을 제출합니다.
//! 매수는 접수 즉시 낙관적으로 반영하고, 매도는 체결 대사에서 반영합니다.
//! 매도는 오늘 매도 기록이 없을 때만 제출하므로, 매수가 모두 실패한 날 다시 실행해도
//! 매도가 중복되지 않습니다.
//! 같은 트리거에서 VR 사이클 대상 포지션도 함께 처리합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use trader_core::{JobType, LogStatus, OrderRecord, OrderSide, Position, StrategyKind};
use trader_exchange::OverseasBroker;
use trader_strategy::{loc_split, OrderIntent};

use super::{submit, vr};
use crate::engine::{Engine, Outcome, PositionJob};
use crate::error::{Result, SchedulerError};
use crate::notifier::Notification;
use crate::stats::BatchStats;
use crate::store::PositionFilter;

/// LOC 분할 매수/매도 작업
pub struct LocSplitJob {
    pub now: DateTime<Utc>,
    pub buy_enabled: bool,
    pub sell_enabled: bool,
}

/// LOC 분할 포지션 처리 후 VR 사이클 실행.
pub async fn run_daily_cycle(engine: &Engine) -> Result<BatchStats> {
    let trading = &engine.config().trading;
    if !trading.auto_buy_enabled && !trading.auto_sell_enabled {
        engine
            .logger()
            .batch(JobType::LocBuy, LogStatus::Skipped, "자동 매매 비활성화", None)
            .await;
        return Ok(BatchStats::new());
    }

    let now = Utc::now();
    let positions = engine
        .positions()
        .list_positions(&PositionFilter::active(StrategyKind::LocSplit))
        .await?;
    info!(count = positions.len(), "LOC 분할 대상");

    let job = LocSplitJob {
        now,
        buy_enabled: trading.auto_buy_enabled,
        sell_enabled: trading.auto_sell_enabled,
    };
    let mut stats = engine.run_positions(&job, positions).await;

    if trading.auto_buy_enabled {
        let vr_stats = vr::run_due_cycles(engine, now).await?;
        stats.merge(&vr_stats);
        stats.elapsed += vr_stats.elapsed;
    }

    Ok(stats)
}

/// 다리별로 제출하고 접수된 것만 모음. 첫 실패는 돌려줍니다.
async fn submit_legs(
    broker: &dyn OverseasBroker,
    position: &Position,
    intents: &[OrderIntent],
) -> (Vec<(OrderIntent, String)>, Option<SchedulerError>) {
    let mut accepted = Vec::with_capacity(intents.len());
    let mut first_error = None;
    for intent in intents {
        match submit(broker, position, intent).await {
            Ok(placed) => accepted.push((intent.clone(), placed.order_id)),
            Err(e) => {
                warn!(
                    ticker = %position.ticker,
                    sub_type = ?intent.sub_type,
                    error = %e,
                    "주문 다리 제출 실패"
                );
                first_error.get_or_insert(e);
            }
        }
    }
    (accepted, first_error)
}

#[async_trait]
impl PositionJob for LocSplitJob {
    fn job_type(&self) -> JobType {
        JobType::LocBuy
    }

    async fn run(
        &self,
        engine: &Engine,
        broker: &dyn OverseasBroker,
        position: Position,
    ) -> Result<Outcome> {
        let bought = engine.bought_today(position.id, self.now).await?;
        let sold = engine
            .ordered_today(position.id, OrderSide::Sell, self.now)
            .await?;
        let buy_step = self.buy_enabled && !bought;
        // 오늘 매수가 반영되기 전의 보유분이 있을 때만
        let sell_step = self.sell_enabled && !sold && !bought && position.has_holdings();
        if !buy_step && !sell_step {
            return Ok(Outcome::skipped(if bought {
                "오늘 이미 매수 주문함"
            } else {
                "오늘 주문할 항목 없음"
            }));
        }

        let quote = broker.get_price(&position.ticker, position.exchange).await?;
        let mut updated = position.clone();
        let mut records: Vec<OrderRecord> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut failure: Option<SchedulerError> = None;
        let mut plan_details = serde_json::Value::Null;

        // 1. 매수
        if buy_step {
            match loc_split::plan_buys(&position, quote.price)? {
                Ok(plan) => {
                    plan_details = json!({
                        "t": plan.t,
                        "loc_percent": plan.loc_percent,
                        "half": plan.half,
                        "reference": plan.reference,
                    });
                    let (accepted, err) = submit_legs(broker, &position, &plan.intents).await;
                    failure = err;
                    loc_split::apply_buys(&mut updated, accepted.iter().map(|(intent, _)| intent));
                    for (intent, order_id) in &accepted {
                        records.push(intent.to_record(position.id, order_id, true));
                    }
                    notes.push(format!("매수 {}/{}건", accepted.len(), plan.intents.len()));
                }
                Err(skip) => notes.push(format!("매수 건너뜀: {}", skip)),
            }
        }

        // 2. 매도
        if sell_step {
            let sells = loc_split::plan_sells(&updated)?;
            let (accepted, err) = submit_legs(broker, &position, &sells).await;
            if failure.is_none() {
                failure = err;
            }
            for (intent, order_id) in &accepted {
                records.push(intent.to_record(position.id, order_id, false));
            }
            notes.push(format!("매도 {}/{}건", accepted.len(), sells.len()));
        }

        if records.is_empty() {
            return match failure {
                Some(e) => Err(e),
                None => Ok(Outcome::skipped(notes.join(", ")).with_details(plan_details)),
            };
        }

        updated.touch();
        if let Err(e) = engine
            .positions()
            .save_position_with_orders(&updated, &records)
            .await
        {
            let order_ids: Vec<&str> = records
                .iter()
                .filter_map(|r| r.order_id.as_deref())
                .collect();
            error!(
                ticker = %position.ticker,
                order_ids = ?order_ids,
                error = %e,
                "주문 접수 후 저장 실패"
            );
            return Err(e.into());
        }

        let message = format!(
            "{} {} (회차 {}/{})",
            position.ticker,
            notes.join(", "),
            updated.current_round,
            updated.total_rounds
        );
        engine.notify(Notification::info("loc_buy", "LOC 분할 주문", message.clone()));

        Ok(Outcome::done(message, records.len()).with_details(json!({
            "plan": plan_details,
            "price": quote.price,
            "orders": records
                .iter()
                .map(|r| json!({
                    "order_id": r.order_id,
                    "side": r.side,
                    "kind": r.kind,
                    "sub_type": r.sub_type,
                    "price": r.price,
                    "quantity": r.quantity,
                }))
                .collect::<Vec<_>>(),
            "first_error": failure.map(|e| e.to_string()),
        })))
    }
}
