//! 거래 ID(TR ID) 테이블.
//!
//! 같은 기능이라도 실전/모의 환경에 따라 TR ID가 다릅니다.

use trader_core::OrderSide;

use crate::config::KisEnvironment;

/// 해외주식 현재가 (실전/모의 공통)
pub const PRICE: &str = "HHDFS00000300";
/// 해외주식 기간별 시세 (실전/모의 공통)
pub const DAILY_PRICE: &str = "HHDFS76240000";

/// 해외주식 주문 (미국).
pub fn order(env: KisEnvironment, side: OrderSide) -> &'static str {
    match (env, side) {
        (KisEnvironment::Real, OrderSide::Buy) => "TTTT1002U",
        (KisEnvironment::Real, OrderSide::Sell) => "TTTT1006U",
        (KisEnvironment::Paper, OrderSide::Buy) => "VTTT1002U",
        (KisEnvironment::Paper, OrderSide::Sell) => "VTTT1001U",
    }
}

/// 해외주식 미체결 내역.
pub fn pending_orders(env: KisEnvironment) -> &'static str {
    match env {
        KisEnvironment::Real => "TTTS3018R",
        KisEnvironment::Paper => "VTTS3018R",
    }
}

/// 해외주식 주문체결 내역.
pub fn filled_orders(env: KisEnvironment) -> &'static str {
    match env {
        KisEnvironment::Real => "TTTS3035R",
        KisEnvironment::Paper => "VTTS3035R",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_and_real_differ() {
        assert_eq!(order(KisEnvironment::Real, OrderSide::Buy), "TTTT1002U");
        assert_eq!(order(KisEnvironment::Paper, OrderSide::Sell), "VTTT1001U");
        assert_ne!(
            filled_orders(KisEnvironment::Real),
            filled_orders(KisEnvironment::Paper)
        );
    }
}
