//! 현재가 점검 / 기본 전략 자동 익절.
//!
//! 보유 중인 기본 전략 포지션의 현재가가 `평단 × (1 + 목표%)` 이상이면
//! 전량 지정가 매도를 제출하고 포지션을 청산 상태로 낙관적 반영합니다.
//! 매도가 체결되지 않으면 체결 대사에서 보유분을 복원합니다.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use trader_core::{JobType, LogStatus, OrderSide, Position, StrategyKind};
use trader_exchange::OverseasBroker;
use trader_strategy::basic;

use super::submit;
use crate::engine::{Engine, Outcome, PositionJob};
use crate::error::Result;
use crate::notifier::Notification;
use crate::stats::BatchStats;
use crate::store::{OrderFilter, PositionFilter};

/// 자동 익절 작업
pub struct PriceCheckJob;

pub async fn run(engine: &Engine) -> Result<BatchStats> {
    if !engine.config().trading.auto_sell_enabled {
        engine
            .logger()
            .batch(JobType::PriceCheck, LogStatus::Skipped, "자동 매도 비활성화", None)
            .await;
        return Ok(BatchStats::new());
    }

    let positions: Vec<Position> = engine
        .positions()
        .list_positions(&PositionFilter::active(StrategyKind::Basic))
        .await?
        .into_iter()
        .filter(Position::has_holdings)
        .collect();
    info!(count = positions.len(), "익절 점검 대상");

    Ok(engine.run_positions(&PriceCheckJob, positions).await)
}

#[async_trait]
impl PositionJob for PriceCheckJob {
    fn job_type(&self) -> JobType {
        JobType::PriceCheck
    }

    async fn run(
        &self,
        engine: &Engine,
        broker: &dyn OverseasBroker,
        position: Position,
    ) -> Result<Outcome> {
        let pending_sells = engine
            .positions()
            .list_orders(
                &OrderFilter::pending()
                    .for_position(position.id)
                    .side(OrderSide::Sell),
            )
            .await?;
        if !pending_sells.is_empty() {
            return Ok(Outcome::skipped("미체결 매도 주문 있음"));
        }

        let quote = broker.get_price(&position.ticker, position.exchange).await?;
        let target = basic::take_profit_price(&position);
        let Some(intent) = basic::plan_take_profit(&position, quote.price) else {
            return Ok(Outcome::skipped(format!(
                "목표가 미도달 (현재가 {}, 목표가 {})",
                quote.price, target
            )));
        };

        let placed = submit(broker, &position, &intent).await?;

        let mut updated = position.clone();
        let profit = basic::apply_liquidation(&mut updated, &intent);
        let mut record = intent.to_record(position.id, &placed.order_id, true);
        record.profit = Some(profit);

        engine
            .positions()
            .save_position_with_orders(&updated, std::slice::from_ref(&record))
            .await?;

        let message = format!(
            "{} {}주 @ {} 익절 주문 (예상 손익 {})",
            position.ticker, intent.quantity, intent.price, profit
        );
        engine.notify(Notification::info("take_profit", "자동 익절", message.clone()));

        Ok(Outcome::done(message, 1).with_details(json!({
            "order_id": placed.order_id,
            "avg_price": position.avg_price,
            "target_price": target,
            "price": quote.price,
            "expected_profit": profit,
        })))
    }
}
