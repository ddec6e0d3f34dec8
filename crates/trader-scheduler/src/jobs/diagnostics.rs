//! 매수 진단 (읽기 전용).
//!
//! 포지션별로 다음 매수가 왜 진행되거나 막히는지 설명합니다.
//! 주문, 저장, 토큰 발급, 시세 캐시 갱신 같은 부수 효과가 없습니다.
//! 시세는 [`trader_exchange::OverseasBroker::peek_price`]로만 조회하고, 토큰이 유효하지 않으면 생략합니다.

use chrono::{DateTime, Utc};
use serde::Serialize;
use trader_core::{MarketCalendar, Position, PositionStatus, StrategyKind};
use trader_strategy::{basic, loc_split, value_rebalance};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{Result, StoreError};
use crate::store::PositionFilter;

/// 진단 항목 하나.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// 포지션 진단 결과.
#[derive(Debug, Clone, Serialize)]
pub struct BuyDiagnosis {
    pub position_id: Uuid,
    pub ticker: String,
    pub strategy: StrategyKind,
    pub can_buy: bool,
    pub checks: Vec<Check>,
}

impl BuyDiagnosis {
    /// 막힌 항목 설명.
    pub fn blockers(&self) -> Vec<&Check> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

struct Checks(Vec<Check>);

impl Checks {
    fn push(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) -> bool {
        self.0.push(Check {
            name,
            passed,
            detail: detail.into(),
        });
        passed
    }
}

/// 포지션 진단 (지정 없으면 전체).
pub async fn diagnose(
    engine: &Engine,
    position_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Vec<BuyDiagnosis>> {
    let positions = match position_id {
        Some(id) => vec![engine
            .positions()
            .get_position(id)
            .await?
            .ok_or(StoreError::NotFound {
                kind: "포지션",
                id,
            })?],
        None => {
            engine
                .positions()
                .list_positions(&PositionFilter::default())
                .await?
        }
    };

    let mut results = Vec::with_capacity(positions.len());
    for position in positions {
        results.push(diagnose_position(engine, &position, now).await?);
    }
    Ok(results)
}

async fn diagnose_position(
    engine: &Engine,
    position: &Position,
    now: DateTime<Utc>,
) -> Result<BuyDiagnosis> {
    let mut checks = Checks(Vec::new());
    let trading_date = MarketCalendar::us_trading_date(now);

    checks.push(
        "auto_buy_enabled",
        engine.config().trading.auto_buy_enabled,
        "AUTO_BUY_ENABLED 설정",
    );
    checks.push(
        "position_auto_enabled",
        position.auto_enabled,
        if position.auto_enabled {
            "자동매매 활성"
        } else {
            "자동매매 꺼짐"
        },
    );
    checks.push(
        "status",
        position.status == PositionStatus::Buying,
        format!("상태 {}", position.status),
    );

    let market_open = MarketCalendar::is_open(trading_date);
    let market_detail = match MarketCalendar::holiday_name(trading_date) {
        Some(name) => format!("{} 휴장 ({})", trading_date, name),
        None if market_open && MarketCalendar::is_early_close(trading_date) => {
            format!("{} 조기폐장일", trading_date)
        }
        None if market_open => format!("{} 거래일", trading_date),
        None => format!("{} 주말", trading_date),
    };
    checks.push("market_open", market_open, market_detail);

    if position.strategy != StrategyKind::ValueRebalance {
        checks.push(
            "rounds_left",
            position.has_rounds_left(),
            format!("회차 {}/{}", position.current_round, position.total_rounds),
        );
    }

    let bought = engine.bought_today(position.id, now).await?;
    checks.push(
        "not_bought_today",
        !bought,
        if bought {
            "오늘 이미 매수 주문함"
        } else {
            "오늘 매수 기록 없음"
        },
    );

    let credential = engine.credentials().get_credential(position.user_id).await?;
    let has_credential = checks.push(
        "credential",
        credential.is_some(),
        if credential.is_some() {
            "인증 정보 있음"
        } else {
            "인증 정보 없음"
        },
    );

    if let (true, Some(credential)) = (has_credential, credential) {
        strategy_checks(engine, position, &credential, now, &mut checks).await;
    }

    let can_buy = checks.0.iter().all(|c| c.passed);
    Ok(BuyDiagnosis {
        position_id: position.id,
        ticker: position.ticker.clone(),
        strategy: position.strategy,
        can_buy,
        checks: checks.0,
    })
}

async fn strategy_checks(
    engine: &Engine,
    position: &Position,
    credential: &trader_core::Credential,
    now: DateTime<Utc>,
    checks: &mut Checks,
) {
    if position.strategy == StrategyKind::ValueRebalance {
        match &position.vr {
            Some(params) => {
                let due = value_rebalance::cycle_due(params, now);
                let detail = match params.last_cycle_at {
                    Some(last) => format!("마지막 사이클 {}, 주기 {}주", last, params.cycle_weeks),
                    None => "첫 사이클".to_string(),
                };
                checks.push("vr_cycle_due", due, detail);
            }
            None => {
                checks.push("vr_params", false, "VR 파라미터 없음");
            }
        }
        return;
    }

    let broker = match engine.connect(credential) {
        Ok(broker) => broker,
        Err(e) => {
            checks.push("broker", false, e.to_string());
            return;
        }
    };

    if !broker.is_token_valid().await {
        let detail = match engine.cooldown().active(position.user_id).await {
            Some(remaining) => format!("토큰 없음, 발급 쿨다운 {}초 남음", remaining.as_secs()),
            None => "토큰 없음, 다음 실행 때 발급".to_string(),
        };
        checks.push("token", false, detail);
        return;
    }
    checks.push("token", true, "토큰 유효");

    let quote = match broker.peek_price(&position.ticker, position.exchange).await {
        Ok(quote) => quote,
        Err(e) => {
            checks.push("quote", false, e.to_string());
            return;
        }
    };

    match position.strategy {
        StrategyKind::Basic => match basic::plan_buy(position, quote.price, quote.previous_close) {
            Ok(intent) => {
                checks.push(
                    "plan",
                    true,
                    format!("{}주 @ {} 매수 예정", intent.quantity, intent.price),
                );
            }
            Err(skip) => {
                checks.push("plan", false, skip.to_string());
            }
        },
        StrategyKind::LocSplit => match loc_split::plan_buys(position, quote.price) {
            Ok(Ok(plan)) => {
                let legs: Vec<String> = plan
                    .intents
                    .iter()
                    .map(|i| format!("{}주 @ {}", i.quantity, i.price))
                    .collect();
                checks.push(
                    "plan",
                    true,
                    format!("T={} LOC%={} {:?}: {}", plan.t, plan.loc_percent, plan.half, legs.join(", ")),
                );
            }
            Ok(Err(skip)) => {
                checks.push("plan", false, skip.to_string());
            }
            Err(e) => {
                checks.push("plan", false, e.to_string());
            }
        },
        StrategyKind::Grid | StrategyKind::ValueRebalance => {
            checks.push("plan", false, "자동 매수 대상 전략 아님");
        }
    }
}
