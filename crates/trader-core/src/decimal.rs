//! 금액/가격 반올림 헬퍼.
//!
//! 미국 주식 주문 가격은 센트(소수 둘째 자리) 단위, 수량은 정수 주식입니다.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// 소수 둘째 자리 반올림 (USD 센트).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// 소수 셋째 자리 반올림 (VR 밴드/사다리 가격).
pub fn round3(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

/// 소수 둘째 자리 올림.
pub fn ceil2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
}

/// 금액으로 살 수 있는 정수 주식 수 (`floor(amount / price)`).
///
/// 가격이 0 이하이면 0을 반환합니다.
pub fn whole_shares(amount: Decimal, price: Decimal) -> i64 {
    if price <= Decimal::ZERO || amount <= Decimal::ZERO {
        return 0;
    }
    (amount / price).floor().to_i64().unwrap_or(0)
}

/// 총 투자금과 수량으로 평균 단가 계산 (센트 반올림).
pub fn average_price(total_invested: Decimal, quantity: i64) -> Decimal {
    if quantity <= 0 {
        return Decimal::ZERO;
    }
    round2(total_invested / Decimal::from(quantity))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn rounding_modes() {
        assert_eq!(round2(dec!(1.005)), dec!(1.01));
        assert_eq!(round3(dec!(849.9995)), dec!(850.000));
        assert_eq!(ceil2(dec!(2.501)), dec!(2.51));
        assert_eq!(ceil2(dec!(2.5)), dec!(2.50));
    }

    #[test]
    fn shares_are_floored() {
        assert_eq!(whole_shares(dec!(1000), dec!(95)), 10);
        assert_eq!(whole_shares(dec!(50), dec!(95)), 0);
        assert_eq!(whole_shares(dec!(50), Decimal::ZERO), 0);
    }

    #[test]
    fn average_of_empty_position_is_zero() {
        assert_eq!(average_price(dec!(100), 0), Decimal::ZERO);
        assert_eq!(average_price(dec!(950), 10), dec!(95.00));
    }
}
