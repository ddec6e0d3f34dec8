//! 그리드 레벨 생성기.
//!
//! `[하한, 상한]` 구간을 등비(퍼센트 간격) 또는 등차로 나누고, 인접한 두 가격을
//! (매수, 매도) 한 쌍으로 묶습니다.
//!
//! ```text
//! 가격:  p0    p1    p2    p3
//! 쌍:   [p0,p1] [p1,p2] [p2,p3]
//! 레벨:  B0 S1   B2 S3   B4 S5     (B: Available, S: Inactive)
//!
//! B0 체결 → S1 Available
//! S1 체결 → B0 Available
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trader_core::{GridLevel, GridLevelStatus, GridLevelType, RoundMethod, TickSizeProvider};

use crate::StrategyError;

fn default_max_points() -> usize {
    200
}

/// 그리드 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// 등차 그리드의 내부 칸 수 (총 가격 점 = grid_count + 2)
    pub grid_count: u32,
    /// 지정 시 등비 그리드 간격 (%)
    #[serde(default)]
    pub percent_step: Option<Decimal>,
    /// 등비 그리드 가격 점 상한
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

impl GridConfig {
    /// 등차 그리드 설정.
    pub fn arithmetic(lower_price: Decimal, upper_price: Decimal, grid_count: u32) -> Self {
        Self {
            lower_price,
            upper_price,
            grid_count,
            percent_step: None,
            max_points: default_max_points(),
        }
    }

    /// 등비 그리드 설정.
    pub fn geometric(lower_price: Decimal, upper_price: Decimal, percent_step: Decimal) -> Self {
        Self {
            percent_step: Some(percent_step),
            ..Self::arithmetic(lower_price, upper_price, 0)
        }
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.lower_price <= Decimal::ZERO {
            return Err(StrategyError::InvalidParameter(format!(
                "하한가는 0보다 커야 합니다: {}",
                self.lower_price
            )));
        }
        if self.upper_price <= self.lower_price {
            return Err(StrategyError::InvalidParameter(format!(
                "상한가({})가 하한가({})보다 커야 합니다",
                self.upper_price, self.lower_price
            )));
        }
        match self.percent_step {
            Some(step) if step <= Decimal::ZERO => Err(StrategyError::InvalidParameter(format!(
                "그리드 간격은 0보다 커야 합니다: {}",
                step
            ))),
            None if self.grid_count == 0 => Err(StrategyError::InvalidParameter(
                "그리드 칸 수는 1 이상".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// 그리드 가격 점 생성.
pub fn grid_prices(
    config: &GridConfig,
    tick: &dyn TickSizeProvider,
) -> Result<Vec<Decimal>, StrategyError> {
    config.validate()?;

    let Some(step) = config.percent_step else {
        let count = config.grid_count + 1;
        let gap = (config.upper_price - config.lower_price) / Decimal::from(count);
        return Ok((0..=count)
            .map(|i| config.lower_price + gap * Decimal::from(i))
            .collect());
    };

    let ratio = Decimal::ONE + step / dec!(100);
    let mut prices: Vec<Decimal> = Vec::new();
    let mut raw = config.lower_price;
    while raw <= config.upper_price && prices.len() < config.max_points {
        let snapped = tick.round_to_tick(raw, RoundMethod::Round);
        if prices.last() != Some(&snapped) {
            prices.push(snapped);
        }
        raw *= ratio;
    }
    Ok(prices)
}

/// 가격 점으로 쌍 레벨 생성.
pub fn build_levels(prices: &[Decimal]) -> Vec<GridLevel> {
    prices
        .windows(2)
        .enumerate()
        .flat_map(|(i, pair)| {
            let (buy, sell) = (pair[0], pair[1]);
            let buy_index = i * 2;
            let sell_index = buy_index + 1;
            [
                GridLevel {
                    index: buy_index,
                    price: buy,
                    buy_price: buy,
                    sell_price: sell,
                    level_type: GridLevelType::Buy,
                    status: GridLevelStatus::Available,
                    paired_index: sell_index,
                },
                GridLevel {
                    index: sell_index,
                    price: sell,
                    buy_price: buy,
                    sell_price: sell,
                    level_type: GridLevelType::Sell,
                    status: GridLevelStatus::Inactive,
                    paired_index: buy_index,
                },
            ]
        })
        .collect()
}

fn level_mut(levels: &mut [GridLevel], index: usize) -> Result<&mut GridLevel, StrategyError> {
    levels
        .iter_mut()
        .find(|l| l.index == index)
        .ok_or_else(|| StrategyError::InvalidParameter(format!("없는 그리드 레벨: {}", index)))
}

/// 주문 접수 표시.
pub fn mark_pending(levels: &mut [GridLevel], index: usize) -> Result<(), StrategyError> {
    let level = level_mut(levels, index)?;
    if !level.is_available() {
        return Err(StrategyError::InvalidParameter(format!(
            "주문 가능한 레벨이 아닙니다: {} ({})",
            index, level.status
        )));
    }
    level.status = GridLevelStatus::Pending;
    Ok(())
}

/// 레벨 체결 처리. 짝 레벨을 활성화하고 그 인덱스를 반환합니다.
pub fn on_level_filled(levels: &mut [GridLevel], index: usize) -> Result<usize, StrategyError> {
    let level = level_mut(levels, index)?;
    level.status = GridLevelStatus::Filled;
    let paired = level.paired_index;

    level_mut(levels, paired)?.status = GridLevelStatus::Available;
    Ok(paired)
}

#[cfg(test)]
mod tests {
    use trader_core::TieredTickSize;

    use super::*;

    #[test]
    fn arithmetic_has_count_plus_two_points() {
        let config = GridConfig::arithmetic(dec!(100), dec!(200), 3);
        let prices = grid_prices(&config, &TieredTickSize::standard()).unwrap();
        assert_eq!(prices, vec![dec!(100), dec!(125), dec!(150), dec!(175), dec!(200)]);
    }

    #[test]
    fn geometric_snaps_and_dedupes() {
        // 호가 단위 1 구간에서 0.1% 간격은 같은 값으로 스냅됨
        let config = GridConfig::geometric(dec!(500), dec!(505), dec!(0.1));
        let prices = grid_prices(&config, &TieredTickSize::standard()).unwrap();
        assert_eq!(
            prices,
            vec![dec!(500), dec!(501), dec!(502), dec!(503), dec!(504), dec!(505)]
        );
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let tick = TieredTickSize::standard();
        assert!(grid_prices(&GridConfig::arithmetic(dec!(200), dec!(100), 3), &tick).is_err());
        assert!(grid_prices(&GridConfig::arithmetic(dec!(100), dec!(200), 0), &tick).is_err());
        assert!(grid_prices(&GridConfig::geometric(dec!(100), dec!(200), dec!(0)), &tick).is_err());
    }

    #[test]
    fn filling_activates_pair() {
        let mut levels = build_levels(&[dec!(10), dec!(11), dec!(12)]);
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[1].status, GridLevelStatus::Inactive);

        mark_pending(&mut levels, 0).unwrap();
        assert!(mark_pending(&mut levels, 1).is_err());

        assert_eq!(on_level_filled(&mut levels, 0).unwrap(), 1);
        assert_eq!(levels[0].status, GridLevelStatus::Filled);
        assert_eq!(levels[1].status, GridLevelStatus::Available);

        assert_eq!(on_level_filled(&mut levels, 1).unwrap(), 0);
        assert_eq!(levels[0].status, GridLevelStatus::Available);
    }
}
