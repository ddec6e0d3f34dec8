//! 기본 전략 일일 매수.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info};
use trader_core::{JobType, LogStatus, Position, StrategyKind};
use trader_exchange::OverseasBroker;
use trader_strategy::basic;

use super::submit;
use crate::engine::{Engine, Outcome, PositionJob};
use crate::error::Result;
use crate::notifier::Notification;
use crate::stats::BatchStats;
use crate::store::PositionFilter;

/// 기본 전략 매수 작업
pub struct BasicBuyJob {
    pub now: DateTime<Utc>,
}

/// 활성 기본 전략 포지션 전체에 일일 매수 실행.
pub async fn run_daily_buy(engine: &Engine) -> Result<BatchStats> {
    if !engine.config().trading.auto_buy_enabled {
        engine
            .logger()
            .batch(JobType::BasicBuy, LogStatus::Skipped, "자동 매수 비활성화", None)
            .await;
        return Ok(BatchStats::new());
    }

    let positions = engine
        .positions()
        .list_positions(&PositionFilter::active(StrategyKind::Basic))
        .await?;
    info!(count = positions.len(), "기본 전략 매수 대상");

    let job = BasicBuyJob { now: Utc::now() };
    Ok(engine.run_positions(&job, positions).await)
}

#[async_trait]
impl PositionJob for BasicBuyJob {
    fn job_type(&self) -> JobType {
        JobType::BasicBuy
    }

    async fn run(
        &self,
        engine: &Engine,
        broker: &dyn OverseasBroker,
        position: Position,
    ) -> Result<Outcome> {
        if engine.bought_today(position.id, self.now).await? {
            return Ok(Outcome::skipped("오늘 이미 매수 주문함"));
        }

        let quote = broker.get_price(&position.ticker, position.exchange).await?;
        let intent = match basic::plan_buy(&position, quote.price, quote.previous_close) {
            Ok(intent) => intent,
            Err(skip) => {
                return Ok(Outcome::skipped(skip.to_string()).with_details(json!(skip)));
            }
        };

        let placed = submit(broker, &position, &intent).await?;

        let mut updated = position.clone();
        basic::apply_buy(&mut updated, &intent);
        updated.touch();
        let record = intent.to_record(position.id, &placed.order_id, true);

        if let Err(e) = engine
            .positions()
            .save_position_with_orders(&updated, std::slice::from_ref(&record))
            .await
        {
            // 주문은 접수됐지만 기록이 없으므로 수동 확인 필요
            error!(
                ticker = %position.ticker,
                order_id = %placed.order_id,
                error = %e,
                "주문 접수 후 저장 실패"
            );
            return Err(e.into());
        }

        let message = format!(
            "{} {}주 @ {} 매수 주문 (회차 {}/{})",
            position.ticker,
            intent.quantity,
            intent.price,
            updated.current_round,
            updated.total_rounds
        );
        engine.notify(Notification::info("basic_buy", "기본 전략 매수", message.clone()));

        Ok(Outcome::done(message, 1).with_details(json!({
            "order_id": placed.order_id,
            "price": intent.price,
            "quantity": intent.quantity,
            "previous_close": quote.previous_close,
        })))
    }
}
