//! 전략 엔진 통합 테스트
//!
//! 기본 조건부 매수, 40분할 LOC, VR 밴드, 그리드 호가 스냅을
//! 실제 운용 수치로 검증합니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trader_core::{
    BuyCondition, ExchangeCode, OrderKind, OrderSide, OrderStatus, OrderSubType, Position,
    PositionStatus, RoundMethod, StrategyKind, TickSizeProvider, TieredTickSize, VrParams,
};
use trader_strategy::{
    basic::{self, BuySkip},
    fills,
    grid::{self, GridConfig},
    loc_split::{self, Half},
    value_rebalance,
};
use uuid::Uuid;

// ============================================================================
// 테스트 헬퍼 함수
// ============================================================================

fn basic_position(buy_amount: Decimal, rounds: u32, condition: BuyCondition) -> Position {
    Position::new(
        Uuid::new_v4(),
        "SOXL",
        ExchangeCode::Amex,
        StrategyKind::Basic,
        buy_amount,
        rounds,
    )
    .with_buy_condition(condition)
}

fn loc_position(buy_amount: Decimal) -> Position {
    Position::new(
        Uuid::new_v4(),
        "TQQQ",
        ExchangeCode::Nasd,
        StrategyKind::LocSplit,
        buy_amount,
        40,
    )
}

// ============================================================================
// 기본 전략
// ============================================================================

#[test]
fn basic_loc_condition_end_to_end() {
    let mut position = basic_position(dec!(1000), 10, BuyCondition::Loc);

    let intent = basic::plan_buy(&position, dec!(95), dec!(100)).unwrap();
    assert_eq!(intent.side, OrderSide::Buy);
    assert_eq!(intent.kind, OrderKind::Limit);
    assert_eq!(intent.quantity, 10);
    assert_eq!(intent.amount(), dec!(950));
    assert_eq!(intent.round, Some(1));

    basic::apply_buy(&mut position, &intent);
    assert_eq!(position.current_round, 1);
    assert_eq!(position.total_quantity, 10);
    assert_eq!(position.total_invested, dec!(950));
    assert_eq!(position.avg_price, dec!(95.00));
}

#[test]
fn basic_buy_rejected_when_rounds_exhausted() {
    let mut position = basic_position(dec!(1000), 3, BuyCondition::Daily);
    position.current_round = 3;

    let skip = basic::plan_buy(&position, dec!(10), dec!(10)).unwrap_err();
    assert_eq!(
        skip,
        BuySkip::RoundsExhausted {
            current: 3,
            total: 3
        }
    );
    assert!(skip.to_string().contains("3/3"));
}

#[test]
fn basic_loc_condition_not_met_above_previous_close() {
    let position = basic_position(dec!(1000), 10, BuyCondition::Loc);
    let skip = basic::plan_buy(&position, dec!(101), dec!(100)).unwrap_err();
    assert!(matches!(skip, BuySkip::ConditionNotMet { .. }));
}

#[test]
fn optimistic_basic_buy_is_corrected_by_actual_fill() {
    let mut position = basic_position(dec!(1000), 10, BuyCondition::Daily);
    let intent = basic::plan_buy(&position, dec!(95), dec!(95)).unwrap();
    basic::apply_buy(&mut position, &intent);

    // 실제로는 94.50에 10주 체결
    fills::substitute_buy(&mut position, 10, dec!(950), 10, dec!(945));
    assert_eq!(position.total_invested, dec!(945));
    assert_eq!(position.avg_price, dec!(94.50));
    assert_eq!(position.current_round, 1);
}

#[test]
fn expired_liquidation_restores_holdings() {
    let mut position = basic_position(dec!(1000), 10, BuyCondition::Daily);
    position.add_holdings(10, dec!(950));
    position.current_round = 2;

    let intent = basic::plan_take_profit(&position, dec!(110)).unwrap();
    let profit = basic::apply_liquidation(&mut position, &intent);
    assert_eq!(profit, dec!(150));
    assert_eq!(position.status, PositionStatus::Completed);

    let mut record = intent.to_record(position.id, "0000012345", true);
    record.profit = Some(profit);
    assert_eq!(record.status, OrderStatus::Pending);

    fills::restore_liquidation(&mut position, &record);
    assert_eq!(position.status, PositionStatus::Buying);
    assert_eq!(position.total_quantity, 10);
    assert_eq!(position.total_invested, dec!(950));
    assert_eq!(position.current_round, 2);
}

// ============================================================================
// 40분할 LOC
// ============================================================================

#[test]
fn t_value_and_loc_percent() {
    let t = loc_split::t_value(Decimal::ZERO, dec!(100)).unwrap();
    assert_eq!(t, dec!(0.00));
    assert_eq!(loc_split::loc_percent(t, 40).unwrap(), dec!(10.00));

    let t = loc_split::t_value(dec!(250), dec!(100)).unwrap();
    assert_eq!(t, dec!(2.50));
    assert_eq!(loc_split::loc_percent(t, 40).unwrap(), dec!(8.75));

    // 올림
    assert_eq!(loc_split::t_value(dec!(250.01), dec!(100)).unwrap(), dec!(2.51));
    assert!(loc_split::t_value(dec!(1), Decimal::ZERO).is_err());
}

#[test]
fn loc_cycle_buys_before_sells() {
    let mut position = loc_position(dec!(200));
    position.add_holdings(10, dec!(500));
    position.current_round = 5;

    let plan = loc_split::plan_buys(&position, dec!(48)).unwrap().unwrap();
    assert_eq!(plan.half, Half::First);
    assert_eq!(plan.t, dec!(2.50));
    assert!(plan.intents.iter().all(|i| i.kind == OrderKind::Loc));
    assert_eq!(plan.intents[0].price, dec!(49.99));
    assert_eq!(plan.intents[1].price, dec!(54.38));

    loc_split::apply_buys(&mut position, &plan.intents);
    assert_eq!(position.current_round, 6);

    let sells = loc_split::plan_sells(&position).unwrap();
    let total: i64 = sells.iter().map(|s| s.quantity).sum();
    assert_eq!(total, position.total_quantity);
    assert_eq!(sells[0].sub_type, Some(OrderSubType::SellA));
    assert_eq!(sells[1].sub_type, Some(OrderSubType::SellB));
}

#[test]
fn loc_split_stops_after_last_round() {
    let mut position = loc_position(dec!(100));
    position.current_round = 40;
    assert!(matches!(
        loc_split::plan_buys(&position, dec!(10)).unwrap(),
        Err(loc_split::LocSkip::RoundsExhausted { .. })
    ));
}

// ============================================================================
// 밸류 리밸런싱
// ============================================================================

#[test]
fn vr_band_bounds() {
    let (low, high) = value_rebalance::band(dec!(1000), dec!(15));
    assert_eq!(low, dec!(850.000));
    assert_eq!(high, dec!(1150.000));
}

#[test]
fn vr_cycle_snaps_ladder_to_cents() {
    let mut position = Position::new(
        Uuid::new_v4(),
        "QLD",
        ExchangeCode::Amex,
        StrategyKind::ValueRebalance,
        Decimal::ZERO,
        0,
    )
    .with_vr(VrParams {
        v: dec!(1000),
        pool: dec!(1000),
        ..VrParams::default()
    });
    position.add_holdings(10, dec!(1000));

    let cycle = value_rebalance::plan_cycle(&position).unwrap();
    // hold: V = 1000 + 1000/10
    assert_eq!(cycle.next_v, dec!(1100));
    assert_eq!(cycle.band_min, dec!(935.000));
    for buy in &cycle.buys {
        assert_eq!(buy.price, buy.price.round_dp(2));
        assert_eq!(buy.sub_type, Some(OrderSubType::VrBuy));
    }
    // 935 / 12 = 77.917 → 77.91 (내림)
    assert_eq!(cycle.buys[0].price, dec!(93.5));
    assert_eq!(cycle.buys[2].price, dec!(77.91));
    assert_eq!(cycle.sells.len(), 9);
}

// ============================================================================
// 그리드
// ============================================================================

#[test]
fn tick_size_snaps_large_prices() {
    let table = TieredTickSize::standard();
    assert_eq!(
        table.round_to_tick(dec!(123456), RoundMethod::Round),
        dec!(123500)
    );
}

#[test]
fn grid_levels_form_self_sustaining_pairs() {
    let config = GridConfig::geometric(dec!(10), dec!(11), dec!(5));
    let prices = grid::grid_prices(&config, &TieredTickSize::standard()).unwrap();
    assert_eq!(prices, vec![dec!(10), dec!(10.5)]);

    let mut levels = grid::build_levels(&prices);
    assert_eq!(levels.len(), 2);
    assert_eq!(grid::on_level_filled(&mut levels, 0).unwrap(), 1);
    assert!(levels[1].is_available());
}
