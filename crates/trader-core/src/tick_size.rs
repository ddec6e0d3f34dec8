//! 호가 단위(tick size).
//!
//! 주문 가격은 가격대별 최소 호가 단위의 배수여야 합니다.
//! 그리드 레벨 생성 시 각 가격을 이 테이블에 맞춰 보정합니다.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// 호가 단위 라운딩 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundMethod {
    /// 가장 가까운 호가 (중간값은 올림)
    #[default]
    Round,
    /// 내림
    Floor,
    /// 올림
    Ceil,
}

/// 호가 단위 제공자.
pub trait TickSizeProvider: Send + Sync {
    /// 가격대에 해당하는 호가 단위.
    fn tick_size(&self, price: Decimal) -> Decimal;

    /// 가격을 호가 단위에 맞춰 보정.
    fn round_to_tick(&self, price: Decimal, method: RoundMethod) -> Decimal {
        let tick = self.tick_size(price);
        if tick <= Decimal::ZERO {
            return price;
        }
        let units = price / tick;
        let rounded = match method {
            RoundMethod::Round => {
                units.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            }
            RoundMethod::Floor => units.floor(),
            RoundMethod::Ceil => units.ceil(),
        };
        (rounded * tick).normalize()
    }
}

/// 가격 구간별 호가 단위 테이블.
///
/// `(하한 가격, 호가 단위)`를 하한 오름차순으로 보관하며,
/// 가격이 속하는 가장 높은 구간의 단위를 사용합니다.
#[derive(Debug, Clone)]
pub struct TieredTickSize {
    tiers: Vec<(Decimal, Decimal)>,
}

impl TieredTickSize {
    /// 사용자 정의 테이블로 생성 (하한 기준 정렬).
    pub fn new(mut tiers: Vec<(Decimal, Decimal)>) -> Self {
        tiers.sort_by(|a, b| a.0.cmp(&b.0));
        Self { tiers }
    }

    /// 기본 가격대 테이블.
    ///
    /// | 가격 구간 | 호가 단위 |
    /// |---|---|
    /// | < 0.1 | 0.0001 |
    /// | 0.1 – 1 | 0.001 |
    /// | 1 – 10 | 0.01 |
    /// | 10 – 100 | 0.1 |
    /// | 100 – 1,000 | 1 |
    /// | 1,000 – 10,000 | 5 |
    /// | 10,000 – 100,000 | 10 |
    /// | 100,000 – 500,000 | 100 |
    /// | 500,000 – 1,000,000 | 500 |
    /// | ≥ 1,000,000 | 1,000 |
    pub fn standard() -> Self {
        Self::new(vec![
            (dec!(0), dec!(0.0001)),
            (dec!(0.1), dec!(0.001)),
            (dec!(1), dec!(0.01)),
            (dec!(10), dec!(0.1)),
            (dec!(100), dec!(1)),
            (dec!(1000), dec!(5)),
            (dec!(10000), dec!(10)),
            (dec!(100000), dec!(100)),
            (dec!(500000), dec!(500)),
            (dec!(1000000), dec!(1000)),
        ])
    }

    /// 미국 주식 (센트 단위 고정).
    pub fn us_equity() -> Self {
        Self::new(vec![(dec!(0), dec!(0.0001)), (dec!(1), dec!(0.01))])
    }
}

impl Default for TieredTickSize {
    fn default() -> Self {
        Self::standard()
    }
}

impl TickSizeProvider for TieredTickSize {
    fn tick_size(&self, price: Decimal) -> Decimal {
        self.tiers
            .iter()
            .rev()
            .find(|(lower, _)| price >= *lower)
            .or_else(|| self.tiers.first())
            .map(|(_, tick)| *tick)
            .unwrap_or(Decimal::ZERO)
    }
}
