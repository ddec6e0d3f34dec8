//! 40분할 LOC 적립 전략.
//!
//! 누적 투자금을 회차 금액으로 나눈 T값으로 진행도를 표현하고,
//! T가 클수록 매수/매도 기준 퍼센트(LOC%)를 낮춥니다.
//!
//! ```text
//! T       = ceil2(누적 투자금 / 회차 금액)
//! LOC%    = max(0, (10 - T/2) × (40 / 총 회차))
//!
//! 전반전 (T < 총 회차/2)
//!   A: 회차금/2, LOC @ 평단 - 0.01
//!   B: 회차금/2, LOC @ 평단 × (1 + LOC%)
//! 후반전
//!   회차금 전체, LOC @ 평단 × (1 - LOC%) - 0.01
//! 매도 (매수 후, 전/후반 무관)
//!   A: 보유 1/4, LOC @ 평단 × (1 + LOC%)
//!   B: 나머지,   지정가 @ 평단 × 1.10
//! ```
//!
//! 매수 주문은 장 마감에만 체결되므로 접수 즉시 전량 체결을 가정해 반영하고,
//! 장 마감 후 체결 대사에서 실제값으로 바로잡습니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;
use trader_core::{
    decimal::{ceil2, round2, whole_shares},
    OrderKind, OrderSubType, Position, PositionStatus,
};

use crate::{fills, OrderIntent, StrategyError};

/// 기준 회차 수
const CANONICAL_ROUNDS: Decimal = dec!(40);
/// 같은 가격 교차 주문 방지용 차감
const CENT: Decimal = dec!(0.01);
/// 매도 B 지정가 배수 (+10%)
const SELL_B_RATIO: Decimal = dec!(1.10);

/// 분할 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Half {
    First,
    Second,
}

/// 매수하지 않는 사유.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LocSkip {
    Completed,
    RoundsExhausted { current: u32, total: u32 },
    /// 모든 매수 다리의 수량이 0
    QuantityZero { amount: Decimal, reference: Decimal },
}

impl std::fmt::Display for LocSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "완료된 포지션"),
            Self::RoundsExhausted { current, total } => {
                write!(f, "회차 소진 ({}/{})", current, total)
            }
            Self::QuantityZero { amount, reference } => {
                write!(f, "매수 수량 0 (금액 {}, 기준가 {})", amount, reference)
            }
        }
    }
}

/// T값 계산 (소수 둘째 자리 올림).
pub fn t_value(total_invested: Decimal, buy_amount: Decimal) -> Result<Decimal, StrategyError> {
    if buy_amount <= Decimal::ZERO {
        return Err(StrategyError::InvalidParameter(format!(
            "회차 금액은 0보다 커야 합니다: {}",
            buy_amount
        )));
    }
    Ok(ceil2(total_invested / buy_amount))
}

/// LOC 퍼센트 계산. 총 회차가 달라도 40분할과 같은 비율이 되도록 보정합니다.
pub fn loc_percent(t: Decimal, total_rounds: u32) -> Result<Decimal, StrategyError> {
    if total_rounds == 0 {
        return Err(StrategyError::InvalidParameter("총 회차는 1 이상".to_string()));
    }
    let scale = CANONICAL_ROUNDS / Decimal::from(total_rounds);
    Ok(((dec!(10) - t / dec!(2)) * scale).max(Decimal::ZERO))
}

/// 전반전/후반전 판정.
pub fn half(t: Decimal, total_rounds: u32) -> Half {
    if t < Decimal::from(total_rounds) / dec!(2) {
        Half::First
    } else {
        Half::Second
    }
}

/// 주문 기준가 (평단, 첫 매수면 현재가).
pub fn reference_price(position: &Position, current_price: Decimal) -> Decimal {
    if position.avg_price > Decimal::ZERO {
        position.avg_price
    } else {
        current_price
    }
}

fn pct(value: Decimal) -> Decimal {
    value / dec!(100)
}

/// 오늘의 매수 계획.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyPlan {
    pub t: Decimal,
    pub loc_percent: Decimal,
    pub half: Half,
    pub reference: Decimal,
    pub intents: Vec<OrderIntent>,
}

/// 매수 주문 계획.
pub fn plan_buys(
    position: &Position,
    current_price: Decimal,
) -> Result<Result<BuyPlan, LocSkip>, StrategyError> {
    if position.status == PositionStatus::Completed {
        return Ok(Err(LocSkip::Completed));
    }
    if !position.has_rounds_left() {
        return Ok(Err(LocSkip::RoundsExhausted {
            current: position.current_round,
            total: position.total_rounds,
        }));
    }

    let t = t_value(position.total_invested, position.buy_amount)?;
    let loc = loc_percent(t, position.total_rounds)?;
    let half = half(t, position.total_rounds);
    let reference = reference_price(position, current_price);
    let round = position.current_round + 1;

    let legs = match half {
        Half::First => {
            let half_amount = position.buy_amount / dec!(2);
            vec![
                (round2(reference - CENT), half_amount, OrderSubType::FirstHalfA),
                (
                    round2(reference * (Decimal::ONE + pct(loc))),
                    half_amount,
                    OrderSubType::FirstHalfB,
                ),
            ]
        }
        Half::Second => vec![(
            round2(reference * (Decimal::ONE - pct(loc)) - CENT),
            position.buy_amount,
            OrderSubType::SecondHalf,
        )],
    };

    let intents: Vec<OrderIntent> = legs
        .into_iter()
        .filter_map(|(price, amount, tag)| {
            let quantity = whole_shares(amount, price);
            (quantity >= 1).then(|| {
                OrderIntent::buy(OrderKind::Loc, price, quantity)
                    .tagged(tag)
                    .with_round(round)
            })
        })
        .collect();

    debug!(
        ticker = %position.ticker,
        t = %t,
        loc_percent = %loc,
        half = ?half,
        legs = intents.len(),
        "LOC 매수 계획"
    );

    if intents.is_empty() {
        return Ok(Err(LocSkip::QuantityZero {
            amount: position.buy_amount,
            reference,
        }));
    }

    Ok(Ok(BuyPlan {
        t,
        loc_percent: loc,
        half,
        reference,
        intents,
    }))
}

/// 접수된 매수 다리들을 낙관적으로 반영하고 회차 +1.
pub fn apply_buys<'a>(position: &mut Position, accepted: impl IntoIterator<Item = &'a OrderIntent>) {
    let mut any = false;
    for intent in accepted {
        fills::apply_buy(position, intent.quantity, intent.amount());
        any = true;
    }
    if any {
        position.current_round += 1;
    }
}

/// 매도 주문 계획 (매수 반영 후 상태 기준).
pub fn plan_sells(position: &Position) -> Result<Vec<OrderIntent>, StrategyError> {
    if !position.has_holdings() || position.avg_price.is_zero() {
        return Ok(Vec::new());
    }

    let t = t_value(position.total_invested, position.buy_amount)?;
    let loc = loc_percent(t, position.total_rounds)?;
    let avg = position.avg_price;

    let quarter = position.total_quantity / 4;
    let rest = position.total_quantity - quarter;

    let mut intents = Vec::with_capacity(2);
    if quarter > 0 {
        intents.push(
            OrderIntent::sell(OrderKind::Loc, round2(avg * (Decimal::ONE + pct(loc))), quarter)
                .tagged(OrderSubType::SellA),
        );
    }
    if rest > 0 {
        intents.push(
            OrderIntent::sell(OrderKind::Limit, round2(avg * SELL_B_RATIO), rest)
                .tagged(OrderSubType::SellB),
        );
    }
    Ok(intents)
}
