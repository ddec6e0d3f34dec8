//! 밸류 리밸런싱(VR) 전략.
//!
//! 목표 평가금 V를 중심으로 밴드를 두고, 밴드 하단 아래에서는 1주씩 매수,
//! 상단 위에서는 1주씩 매도하는 지정가 사다리를 사이클마다 다시 깝니다.
//!
//! ```text
//! 사이클
//! ├── 풀 조정     P ± 입/출금액 (스타일별)
//! ├── 다음 V      V + P/G (± 입/출금액)
//! ├── 밴드        [V×(1-b%), V×(1+b%)]  (소수 셋째 자리)
//! ├── 매수 사다리 밴드하단 / (보유+n),  누적 ≤ 풀 × 사용률
//! └── 매도 사다리 밴드상단 / (보유-n),  최소 1주 남김
//! ```
//!
//! 이전 사이클의 미체결 사다리는 취소하지 않고 그대로 둡니다.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;
use trader_core::{
    decimal::{round2, round3},
    OrderKind, OrderSide, OrderSubType, Position, RoundMethod, TickSizeProvider, TieredTickSize,
    VrParams, VrStyle,
};

use crate::{OrderIntent, StrategyError};

/// 매수 사다리 최대 칸 수
pub const MAX_BUY_RUNGS: usize = 100;
/// 매도 사다리 최대 칸 수
pub const MAX_SELL_RUNGS: usize = 99;
/// 매수 사다리 최저가
const MIN_RUNG_PRICE: Decimal = dec!(1);

/// 밴드 [하단, 상단].
pub fn band(v: Decimal, band_percent: Decimal) -> (Decimal, Decimal) {
    let ratio = band_percent / dec!(100);
    (
        round3(v * (Decimal::ONE - ratio)),
        round3(v * (Decimal::ONE + ratio)),
    )
}

/// 스타일별 풀 사용률.
pub fn pool_usage(style: VrStyle) -> Decimal {
    match style {
        VrStyle::Deposit => dec!(0.75),
        VrStyle::Hold => dec!(0.50),
        VrStyle::Withdraw => dec!(0.25),
    }
}

/// 다음 사이클 V.
pub fn next_v(params: &VrParams) -> Result<Decimal, StrategyError> {
    if params.gradient <= Decimal::ZERO {
        return Err(StrategyError::InvalidParameter(format!(
            "기울기 G는 0보다 커야 합니다: {}",
            params.gradient
        )));
    }
    let base = params.v + params.pool / params.gradient;
    let next = match params.style {
        VrStyle::Deposit => base + params.deposit_amount,
        VrStyle::Hold => base,
        VrStyle::Withdraw => base - params.deposit_amount,
    };
    Ok(round2(next))
}

/// 사이클 입/출금 반영 후 풀.
pub fn adjusted_pool(params: &VrParams) -> Decimal {
    match params.style {
        VrStyle::Deposit => params.pool + params.deposit_amount,
        VrStyle::Hold => params.pool,
        VrStyle::Withdraw => (params.pool - params.deposit_amount).max(Decimal::ZERO),
    }
}

/// 매수 사다리 가격 (1주씩).
pub fn buy_ladder(band_min: Decimal, quantity: i64, budget: Decimal) -> Vec<Decimal> {
    let base = quantity.max(1);
    let mut prices = Vec::new();
    let mut spent = Decimal::ZERO;

    for n in 0..MAX_BUY_RUNGS as i64 {
        let price = round3(band_min / Decimal::from(base + n));
        if price < MIN_RUNG_PRICE || spent + price > budget {
            break;
        }
        spent += price;
        prices.push(price);
    }
    prices
}

/// 매도 사다리 가격 (1주씩, 최소 1주 보유).
pub fn sell_ladder(band_max: Decimal, quantity: i64) -> Vec<Decimal> {
    (0..quantity.saturating_sub(1))
        .take(MAX_SELL_RUNGS)
        .map(|n| round3(band_max / Decimal::from(quantity - n)))
        .collect()
}

/// 사이클 실행 시점인지 확인.
pub fn cycle_due(params: &VrParams, now: DateTime<Utc>) -> bool {
    match params.last_cycle_at {
        None => true,
        Some(last) => now - last >= Duration::weeks(i64::from(params.cycle_weeks)),
    }
}

/// 한 사이클의 계산 결과.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VrCycle {
    pub previous_v: Decimal,
    pub next_v: Decimal,
    pub pool_before: Decimal,
    pub pool_after: Decimal,
    pub band_min: Decimal,
    pub band_max: Decimal,
    /// 매수 사다리에 쓸 수 있는 풀 금액
    pub budget: Decimal,
    pub buys: Vec<OrderIntent>,
    pub sells: Vec<OrderIntent>,
}

impl VrCycle {
    /// 매수 → 매도 순서의 전체 주문.
    pub fn intents(&self) -> impl Iterator<Item = &OrderIntent> {
        self.buys.iter().chain(self.sells.iter())
    }
}

fn params(position: &Position) -> Result<&VrParams, StrategyError> {
    position
        .vr
        .as_ref()
        .ok_or(StrategyError::MissingParameters("vr"))
}

/// 사이클 계획. 포지션은 변경하지 않습니다.
pub fn plan_cycle(position: &Position) -> Result<VrCycle, StrategyError> {
    let params = params(position)?;
    if params.v <= Decimal::ZERO {
        return Err(StrategyError::InvalidParameter(format!(
            "V는 0보다 커야 합니다: {}",
            params.v
        )));
    }

    let next = next_v(params)?;
    let pool_after = adjusted_pool(params);
    let (band_min, band_max) = band(next, params.band_percent);
    let budget = pool_after * pool_usage(params.style);

    let tick = TieredTickSize::us_equity();
    let buys: Vec<OrderIntent> = buy_ladder(band_min, position.total_quantity, budget)
        .into_iter()
        .map(|price| {
            OrderIntent::buy(OrderKind::Limit, tick.round_to_tick(price, RoundMethod::Floor), 1)
                .tagged(OrderSubType::VrBuy)
        })
        .collect();
    let sells: Vec<OrderIntent> = sell_ladder(band_max, position.total_quantity)
        .into_iter()
        .map(|price| {
            OrderIntent::sell(OrderKind::Limit, tick.round_to_tick(price, RoundMethod::Ceil), 1)
                .tagged(OrderSubType::VrSell)
        })
        .collect();

    debug!(
        ticker = %position.ticker,
        v = %next,
        pool = %pool_after,
        band_min = %band_min,
        band_max = %band_max,
        buys = buys.len(),
        sells = sells.len(),
        "VR 사이클 계획"
    );

    Ok(VrCycle {
        previous_v: params.v,
        next_v: next,
        pool_before: params.pool,
        pool_after,
        band_min,
        band_max,
        budget,
        buys,
        sells,
    })
}

/// 사이클 결과를 포지션 파라미터에 반영.
pub fn apply_cycle(
    position: &mut Position,
    cycle: &VrCycle,
    now: DateTime<Utc>,
) -> Result<(), StrategyError> {
    let params = position
        .vr
        .as_mut()
        .ok_or(StrategyError::MissingParameters("vr"))?;
    params.v = cycle.next_v;
    params.pool = cycle.pool_after;
    params.last_cycle_at = Some(now);
    position.touch();
    Ok(())
}

/// 사다리 체결 반영. 매도면 실현 손익 반환.
pub fn apply_fill(
    position: &mut Position,
    side: OrderSide,
    quantity: i64,
    amount: Decimal,
) -> Result<Option<Decimal>, StrategyError> {
    let params = position
        .vr
        .as_mut()
        .ok_or(StrategyError::MissingParameters("vr"))?;

    match side {
        OrderSide::Buy => {
            params.pool -= amount;
            position.add_holdings(quantity, amount);
            Ok(None)
        }
        OrderSide::Sell => {
            params.pool += amount;
            let quantity = quantity.min(position.total_quantity);
            let cost = crate::fills::sell_cost_basis(position, quantity);
            position.remove_holdings(quantity, cost);
            Ok(Some(round2(amount - cost)))
        }
    }
}

#[cfg(test)]
mod tests {
    use trader_core::{ExchangeCode, StrategyKind};
    use uuid::Uuid;

    use super::*;

    fn vr_position(quantity: i64, pool: Decimal, style: VrStyle) -> Position {
        let mut p = Position::new(
            Uuid::new_v4(),
            "QLD",
            ExchangeCode::Amex,
            StrategyKind::ValueRebalance,
            Decimal::ZERO,
            0,
        )
        .with_vr(VrParams {
            v: dec!(1000),
            pool,
            style,
            deposit_amount: dec!(100),
            ..VrParams::default()
        });
        if quantity > 0 {
            p.add_holdings(quantity, Decimal::from(quantity) * dec!(100));
        }
        p
    }

    #[test]
    fn next_v_by_style() {
        let mut params = VrParams {
            v: dec!(1000),
            pool: dec!(500),
            deposit_amount: dec!(100),
            ..VrParams::default()
        };
        params.style = VrStyle::Deposit;
        assert_eq!(next_v(&params).unwrap(), dec!(1150));
        params.style = VrStyle::Hold;
        assert_eq!(next_v(&params).unwrap(), dec!(1050));
        params.style = VrStyle::Withdraw;
        assert_eq!(next_v(&params).unwrap(), dec!(950));
    }

    #[test]
    fn withdraw_never_drives_pool_negative() {
        let params = VrParams {
            pool: dec!(50),
            style: VrStyle::Withdraw,
            deposit_amount: dec!(100),
            ..VrParams::default()
        };
        assert_eq!(adjusted_pool(&params), Decimal::ZERO);
    }

    #[test]
    fn buy_ladder_stops_at_budget() {
        let prices = buy_ladder(dec!(850), 10, dec!(500));
        assert_eq!(prices.len(), 7);
        assert_eq!(prices[0], dec!(85));
        assert_eq!(prices[1], dec!(77.273));
        assert_eq!(prices[6], dec!(53.125));
    }

    #[test]
    fn buy_ladder_stops_below_one_dollar() {
        let prices = buy_ladder(dec!(5), 1, dec!(1000000));
        // 5, 2.5, 1.667, 1.25, 1 → 다음은 0.833
        assert_eq!(prices.len(), 5);
    }

    #[test]
    fn sell_ladder_keeps_one_share() {
        let prices = sell_ladder(dec!(1150), 10);
        assert_eq!(prices.len(), 9);
        assert_eq!(prices[0], dec!(115));
        assert_eq!(prices[8], dec!(575));
        assert!(sell_ladder(dec!(1150), 1).is_empty());
        assert!(sell_ladder(dec!(1150), 0).is_empty());
        assert_eq!(sell_ladder(dec!(1150), 500).len(), MAX_SELL_RUNGS);
    }

    #[test]
    fn cycle_without_v_is_rejected() {
        let mut p = vr_position(0, dec!(100), VrStyle::Hold);
        if let Some(vr) = p.vr.as_mut() {
            vr.v = Decimal::ZERO;
        }
        assert!(plan_cycle(&p).is_err());

        let plain = Position::new(
            Uuid::new_v4(),
            "QLD",
            ExchangeCode::Amex,
            StrategyKind::ValueRebalance,
            Decimal::ZERO,
            0,
        );
        assert_eq!(
            plan_cycle(&plain),
            Err(StrategyError::MissingParameters("vr"))
        );
    }

    #[test]
    fn cycle_updates_v_and_pool() {
        let mut p = vr_position(10, dec!(1000), VrStyle::Deposit);
        let cycle = plan_cycle(&p).unwrap();
        assert_eq!(cycle.next_v, dec!(1200));
        assert_eq!(cycle.pool_after, dec!(1100));
        assert_eq!(cycle.band_min, dec!(1020.000));
        assert!(cycle.buys.iter().all(|i| i.quantity == 1));
        assert!(cycle.sells.iter().all(|i| i.side == OrderSide::Sell));

        let now = Utc::now();
        apply_cycle(&mut p, &cycle, now).unwrap();
        let vr = p.vr.as_ref().unwrap();
        assert_eq!(vr.v, dec!(1200));
        assert_eq!(vr.pool, dec!(1100));
        assert!(!cycle_due(vr, now + Duration::days(13)));
        assert!(cycle_due(vr, now + Duration::days(14)));
    }

    #[test]
    fn fills_move_cash_between_pool_and_holdings() {
        let mut p = vr_position(10, dec!(1000), VrStyle::Hold);
        apply_fill(&mut p, OrderSide::Buy, 1, dec!(85)).unwrap();
        assert_eq!(p.vr.as_ref().unwrap().pool, dec!(915));
        assert_eq!(p.total_quantity, 11);

        let profit = apply_fill(&mut p, OrderSide::Sell, 1, dec!(120)).unwrap();
        assert_eq!(p.vr.as_ref().unwrap().pool, dec!(1035));
        assert_eq!(p.total_quantity, 10);
        assert!(profit.is_some());
    }
}
