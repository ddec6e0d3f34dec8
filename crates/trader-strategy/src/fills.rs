//! 체결 결과를 포지션에 반영.
//!
//! 낙관적으로 반영된 주문은 체결 시 가정값을 실제값으로 바꾸고(`substitute_buy`),
//! 만료 시 가정값을 되돌립니다(`revert_buy`, `restore_liquidation`).
//! 낙관적 반영이 없던 주문은 체결 시 새로 적용합니다(`apply_buy`, `apply_sell`).

use rust_decimal::Decimal;
use trader_core::{decimal::round2, OrderRecord, Position, PositionStatus};

/// 매수 체결 반영.
pub fn apply_buy(position: &mut Position, quantity: i64, amount: Decimal) {
    position.add_holdings(quantity, amount);
}

/// 낙관적 매수 가정 취소 (회차는 유지).
pub fn revert_buy(position: &mut Position, quantity: i64, amount: Decimal) {
    position.remove_holdings(quantity, amount);
}

/// 낙관적 매수 가정을 실제 체결로 교체.
pub fn substitute_buy(
    position: &mut Position,
    assumed_quantity: i64,
    assumed_amount: Decimal,
    actual_quantity: i64,
    actual_amount: Decimal,
) {
    position.remove_holdings(assumed_quantity, assumed_amount);
    position.add_holdings(actual_quantity, actual_amount);
}

/// 매도 원가 (평단 기준, 전량이면 누적 투자금 그대로).
pub fn sell_cost_basis(position: &Position, quantity: i64) -> Decimal {
    if quantity >= position.total_quantity {
        position.total_invested
    } else {
        round2(position.cost_basis(quantity))
    }
}

/// 매도 체결 반영 후 실현 손익 반환.
///
/// 보유 수량이 0이 되면 포지션을 초기화하고 완료 처리합니다.
pub fn apply_sell(position: &mut Position, quantity: i64, amount: Decimal) -> Decimal {
    let quantity = quantity.min(position.total_quantity);
    let cost = sell_cost_basis(position, quantity);
    position.remove_holdings(quantity, cost);
    if !position.has_holdings() {
        position.reset_after_liquidation();
    }
    round2(amount - cost)
}

/// 전량 청산을 가정했던 매도가 만료되면 보유분/회차를 복원.
pub fn restore_liquidation(position: &mut Position, record: &OrderRecord) {
    let cost = record.amount - record.profit.unwrap_or(Decimal::ZERO);
    position.add_holdings(record.quantity, cost);
    position.current_round = record.round.unwrap_or(position.current_round);
    position.status = PositionStatus::Buying;
    position.touch();
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use trader_core::{ExchangeCode, StrategyKind};
    use uuid::Uuid;

    use super::*;

    fn position_with(qty: i64, invested: Decimal) -> Position {
        let mut p = Position::new(
            Uuid::new_v4(),
            "TQQQ",
            ExchangeCode::Nasd,
            StrategyKind::LocSplit,
            dec!(100),
            40,
        );
        p.add_holdings(qty, invested);
        p
    }

    #[test]
    fn substitute_replaces_assumed_amount() {
        let mut p = position_with(10, dec!(500));
        // 가정: 2주 @ 49, 실제: 2주 @ 48.50
        p.add_holdings(2, dec!(98));
        substitute_buy(&mut p, 2, dec!(98), 2, dec!(97));
        assert_eq!(p.total_quantity, 12);
        assert_eq!(p.total_invested, dec!(597));
        assert_eq!(p.avg_price, dec!(49.75));
    }

    #[test]
    fn partial_sell_keeps_average() {
        let mut p = position_with(8, dec!(400));
        let profit = apply_sell(&mut p, 2, dec!(110));
        assert_eq!(profit, dec!(10));
        assert_eq!(p.total_quantity, 6);
        assert_eq!(p.avg_price, dec!(50));
        assert_eq!(p.status, PositionStatus::Buying);
    }

    #[test]
    fn selling_everything_completes_position() {
        let mut p = position_with(3, dec!(100));
        p.current_round = 4;
        let profit = apply_sell(&mut p, 3, dec!(120));
        assert_eq!(profit, dec!(20));
        assert_eq!(p.total_quantity, 0);
        assert_eq!(p.current_round, 0);
        assert_eq!(p.status, PositionStatus::Completed);
    }
}
