//! 조건부 일일 매수 전략.
//!
//! | 조건 | 매수 시점 |
//! |---|---|
//! | daily | 항상 |
//! | loc | 현재가 ≤ 전일 종가 |
//! | waterfall | 첫 회차 또는 현재가 ≤ 평단 × 0.95 |
//! | loc_waterfall | 첫 회차: loc만, 이후: loc AND waterfall |
//!
//! 매수는 현재가 지정가로 `floor(회차 금액 / 현재가)`주를 주문하고 포지션에
//! 낙관적으로 반영합니다. 현재가가 `평단 × (1 + 목표%)` 이상이면 전량 익절합니다.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use trader_core::{
    decimal::{round2, whole_shares},
    BuyCondition, OrderKind, OrderSubType, Position, PositionStatus,
};

use crate::{fills, OrderIntent};

/// 물타기 기준 (평단 대비 -5%)
const WATERFALL_RATIO: Decimal = dec!(0.95);

/// 매수하지 않는 사유.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BuySkip {
    /// 익절 완료된 포지션
    Completed,
    /// 회차 소진
    RoundsExhausted { current: u32, total: u32 },
    /// 매수 조건 불충족
    ConditionNotMet {
        condition: BuyCondition,
        price: Decimal,
        previous_close: Decimal,
        avg_price: Decimal,
    },
    /// 1주도 살 수 없음
    QuantityZero { amount: Decimal, price: Decimal },
}

impl fmt::Display for BuySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "완료된 포지션"),
            Self::RoundsExhausted { current, total } => {
                write!(f, "회차 소진 ({}/{})", current, total)
            }
            Self::ConditionNotMet {
                condition,
                price,
                previous_close,
                avg_price,
            } => write!(
                f,
                "매수 조건 불충족 ({}: 현재가 {}, 전일종가 {}, 평단 {})",
                condition, price, previous_close, avg_price
            ),
            Self::QuantityZero { amount, price } => {
                write!(f, "매수 수량 0 (금액 {}, 현재가 {})", amount, price)
            }
        }
    }
}

/// 매수 조건 판정.
pub fn condition_met(
    condition: BuyCondition,
    is_first_round: bool,
    price: Decimal,
    previous_close: Decimal,
    avg_price: Decimal,
) -> bool {
    let loc = price <= previous_close;
    let waterfall = is_first_round || price <= avg_price * WATERFALL_RATIO;
    match condition {
        BuyCondition::Daily => true,
        BuyCondition::Loc => loc,
        BuyCondition::Waterfall => waterfall,
        BuyCondition::LocWaterfall if is_first_round => loc,
        BuyCondition::LocWaterfall => loc && waterfall,
    }
}

/// 오늘 매수 주문 계획.
pub fn plan_buy(
    position: &Position,
    price: Decimal,
    previous_close: Decimal,
) -> Result<OrderIntent, BuySkip> {
    if position.status == PositionStatus::Completed {
        return Err(BuySkip::Completed);
    }
    if !position.has_rounds_left() {
        return Err(BuySkip::RoundsExhausted {
            current: position.current_round,
            total: position.total_rounds,
        });
    }
    if !condition_met(
        position.buy_condition,
        position.is_first_round(),
        price,
        previous_close,
        position.avg_price,
    ) {
        return Err(BuySkip::ConditionNotMet {
            condition: position.buy_condition,
            price,
            previous_close,
            avg_price: position.avg_price,
        });
    }

    let price = round2(price);
    let quantity = whole_shares(position.buy_amount, price);
    if quantity < 1 {
        return Err(BuySkip::QuantityZero {
            amount: position.buy_amount,
            price,
        });
    }

    Ok(OrderIntent::buy(OrderKind::Limit, price, quantity).with_round(position.current_round + 1))
}

/// 매수 주문 접수 후 낙관적 반영 (전량 체결 가정, 회차 +1).
pub fn apply_buy(position: &mut Position, intent: &OrderIntent) {
    fills::apply_buy(position, intent.quantity, intent.amount());
    position.current_round += 1;
}

/// 익절 목표가.
pub fn take_profit_price(position: &Position) -> Decimal {
    round2(position.avg_price * (Decimal::ONE + position.target_profit_pct / dec!(100)))
}

/// 익절 조건이면 전량 매도 주문 계획.
pub fn plan_take_profit(position: &Position, price: Decimal) -> Option<OrderIntent> {
    if !position.has_holdings() || position.avg_price.is_zero() {
        return None;
    }
    if price < take_profit_price(position) {
        return None;
    }
    Some(
        OrderIntent::sell(OrderKind::Limit, round2(price), position.total_quantity)
            .tagged(OrderSubType::TakeProfit)
            .with_round(position.current_round),
    )
}

/// 익절 매도 접수 후 낙관적 반영. 실현 손익(매도금 - 누적 투자금) 반환.
pub fn apply_liquidation(position: &mut Position, intent: &OrderIntent) -> Decimal {
    let profit = round2(intent.amount() - position.total_invested);
    position.reset_after_liquidation();
    profit
}

#[cfg(test)]
mod tests {
    use trader_core::{ExchangeCode, StrategyKind};
    use uuid::Uuid;

    use super::*;

    fn position(condition: BuyCondition) -> Position {
        Position::new(
            Uuid::new_v4(),
            "SOXL",
            ExchangeCode::Amex,
            StrategyKind::Basic,
            dec!(1000),
            10,
        )
        .with_buy_condition(condition)
    }

    #[test]
    fn condition_table() {
        // loc
        assert!(condition_met(BuyCondition::Loc, false, dec!(99), dec!(100), dec!(0)));
        assert!(!condition_met(BuyCondition::Loc, false, dec!(101), dec!(100), dec!(0)));
        // waterfall
        assert!(condition_met(BuyCondition::Waterfall, true, dec!(200), dec!(100), dec!(50)));
        assert!(condition_met(BuyCondition::Waterfall, false, dec!(95), dec!(100), dec!(100)));
        assert!(!condition_met(BuyCondition::Waterfall, false, dec!(96), dec!(100), dec!(100)));
        // loc_waterfall: 첫 회차는 loc만
        assert!(condition_met(BuyCondition::LocWaterfall, true, dec!(99), dec!(100), dec!(0)));
        assert!(!condition_met(BuyCondition::LocWaterfall, false, dec!(99), dec!(100), dec!(100)));
        assert!(condition_met(BuyCondition::LocWaterfall, false, dec!(90), dec!(100), dec!(100)));
    }

    #[test]
    fn rejects_when_rounds_exhausted() {
        let mut p = position(BuyCondition::Daily);
        p.current_round = 10;
        assert_eq!(
            plan_buy(&p, dec!(10), dec!(10)),
            Err(BuySkip::RoundsExhausted {
                current: 10,
                total: 10
            })
        );
    }

    #[test]
    fn expensive_share_yields_no_quantity() {
        let p = position(BuyCondition::Daily);
        assert!(matches!(
            plan_buy(&p, dec!(1500), dec!(1500)),
            Err(BuySkip::QuantityZero { .. })
        ));
    }

    #[test]
    fn take_profit_liquidates_everything() {
        let mut p = position(BuyCondition::Daily);
        p.add_holdings(10, dec!(950));
        p.current_round = 3;

        assert_eq!(take_profit_price(&p), dec!(104.50));
        assert!(plan_take_profit(&p, dec!(104.49)).is_none());

        let intent = plan_take_profit(&p, dec!(105)).unwrap();
        assert_eq!(intent.quantity, 10);
        assert_eq!(intent.sub_type, Some(OrderSubType::TakeProfit));

        let profit = apply_liquidation(&mut p, &intent);
        assert_eq!(profit, dec!(100));
        assert_eq!(p.status, PositionStatus::Completed);
        assert_eq!(p.current_round, 0);
        assert_eq!(p.avg_price, Decimal::ZERO);
    }
}
