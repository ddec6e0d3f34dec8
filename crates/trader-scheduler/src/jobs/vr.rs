//! VR 사이클.
//!
//! 주기(`cycle_weeks`)가 지난 포지션만 대상으로, 새 V와 밴드를 계산해
//! 매수/매도 사다리를 지정가 1주씩 제출합니다. 사다리는 체결 시점에만 포지션에 반영됩니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use trader_core::{JobType, OrderRecord, Position, PositionStatus, StrategyKind};
use trader_exchange::OverseasBroker;
use trader_strategy::value_rebalance;

use super::submit;
use crate::engine::{Engine, Outcome, PositionJob};
use crate::error::{Result, SchedulerError};
use crate::notifier::Notification;
use crate::stats::BatchStats;
use crate::store::PositionFilter;

/// VR 사이클 작업
pub struct VrCycleJob {
    pub now: DateTime<Utc>,
}

/// 주기가 도래한 VR 포지션 처리.
pub async fn run_due_cycles(engine: &Engine, now: DateTime<Utc>) -> Result<BatchStats> {
    let positions: Vec<Position> = engine
        .positions()
        .list_positions(&PositionFilter::active(StrategyKind::ValueRebalance))
        .await?
        .into_iter()
        .filter(|p| {
            p.vr
                .as_ref()
                .is_some_and(|params| value_rebalance::cycle_due(params, now))
        })
        .collect();

    if positions.is_empty() {
        return Ok(BatchStats::new());
    }
    info!(count = positions.len(), "VR 사이클 대상");

    let job = VrCycleJob { now };
    Ok(engine.run_positions(&job, positions).await)
}

#[async_trait]
impl PositionJob for VrCycleJob {
    fn job_type(&self) -> JobType {
        JobType::VrCycle
    }

    async fn run(
        &self,
        engine: &Engine,
        broker: &dyn OverseasBroker,
        position: Position,
    ) -> Result<Outcome> {
        if position.status == PositionStatus::Completed {
            return Ok(Outcome::skipped("완료된 포지션"));
        }

        let cycle = value_rebalance::plan_cycle(&position)?;

        let mut records: Vec<OrderRecord> = Vec::new();
        let mut failed = 0usize;
        let mut first_error: Option<SchedulerError> = None;
        for intent in cycle.intents() {
            match submit(broker, &position, intent).await {
                Ok(placed) => records.push(intent.to_record(position.id, &placed.order_id, false)),
                Err(e) => {
                    warn!(
                        ticker = %position.ticker,
                        side = %intent.side,
                        price = %intent.price,
                        error = %e,
                        "VR 사다리 주문 실패"
                    );
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        let planned = cycle.buys.len() + cycle.sells.len();
        if records.is_empty() && planned > 0 {
            // 하나도 접수되지 않으면 사이클을 넘기지 않고 다음 트리거에서 재시도
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let mut updated = position.clone();
        value_rebalance::apply_cycle(&mut updated, &cycle, self.now)?;
        engine
            .positions()
            .save_position_with_orders(&updated, &records)
            .await?;

        let message = format!(
            "{} V {} → {}, 밴드 {} ~ {}, 사다리 {}/{}건",
            position.ticker,
            cycle.previous_v,
            cycle.next_v,
            cycle.band_min,
            cycle.band_max,
            records.len(),
            planned
        );
        engine.notify(Notification::info("vr_cycle", "VR 사이클", message.clone()));

        Ok(Outcome::done(message, records.len()).with_details(json!({
            "previous_v": cycle.previous_v,
            "next_v": cycle.next_v,
            "pool_before": cycle.pool_before,
            "pool_after": cycle.pool_after,
            "budget": cycle.budget,
            "buys": cycle.buys.len(),
            "sells": cycle.sells.len(),
            "failed": failed,
        })))
    }
}
