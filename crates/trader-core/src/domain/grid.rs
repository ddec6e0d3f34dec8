//! 그리드 레벨.
//!
//! 인접한 두 가격이 (매수, 매도) 한 쌍을 이룹니다. 한쪽이 체결되면
//! 짝이 되는 레벨이 활성화되어 사다리가 계속 돌아갑니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::text_enum;

/// 그리드 레벨 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLevelType {
    Buy,
    Sell,
}

text_enum!(GridLevelType, "grid level type" {
    Buy => "buy",
    Sell => "sell",
});

/// 그리드 레벨 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLevelStatus {
    /// 주문 가능
    Available,
    /// 주문 접수됨
    Pending,
    /// 체결됨
    Filled,
    /// 짝 레벨 체결 대기
    Inactive,
}

text_enum!(GridLevelStatus, "grid level status" {
    Available => "available",
    Pending => "pending",
    Filled => "filled",
    Inactive => "inactive",
});

/// 그리드 레벨 하나.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// 레벨 인덱스 (사다리 내 위치)
    pub index: usize,
    /// 이 레벨의 주문 가격
    pub price: Decimal,
    /// 쌍의 매수 가격
    pub buy_price: Decimal,
    /// 쌍의 매도 가격
    pub sell_price: Decimal,
    pub level_type: GridLevelType,
    pub status: GridLevelStatus,
    /// 짝 레벨 인덱스
    pub paired_index: usize,
}

impl GridLevel {
    /// 주문 가능 여부.
    pub fn is_available(&self) -> bool {
        self.status == GridLevelStatus::Available
    }
}
