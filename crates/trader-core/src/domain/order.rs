//! 주문 기록.
//!
//! 주문 제출 시 `Pending`으로 생성되고, 체결 대사(reconciliation)에서
//! 정확히 한 번 종결 상태(`Filled`/`Unfilled`/`Cancelled`)로 전이됩니다.
//! 종결 상태에서 다시 바뀌지 않습니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::text_enum;

/// 매수/매도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide, "order side" {
    Buy => "buy",
    Sell => "sell",
});

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// 지정가
    Limit,
    /// 장마감 지정가 (종가 단일가에서만 체결)
    Loc,
}

text_enum!(OrderKind, "order kind" {
    Limit => "limit",
    Loc => "loc",
});

/// 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Unfilled,
    Cancelled,
}

text_enum!(OrderStatus, "order status" {
    Pending => "pending",
    Filled => "filled",
    Unfilled => "unfilled",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// 종결 상태 여부.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 전이 허용 여부 (`Pending` → 종결 상태만 허용).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }
}

/// 주문 세부 태그.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSubType {
    /// LOC 분할 전반전 A (평단 - 0.01)
    FirstHalfA,
    /// LOC 분할 전반전 B (평단 × (1 + LOC%))
    FirstHalfB,
    /// LOC 분할 후반전
    SecondHalf,
    /// LOC 분할 매도 A (1/4, LOC)
    SellA,
    /// LOC 분할 매도 B (3/4, 지정가 +10%)
    SellB,
    /// 기본 전략 익절 (전량)
    TakeProfit,
    /// VR 매수 사다리
    VrBuy,
    /// VR 매도 사다리
    VrSell,
}

text_enum!(OrderSubType, "order sub type" {
    FirstHalfA => "first_half_a",
    FirstHalfB => "first_half_b",
    SecondHalf => "second_half",
    SellA => "sell_a",
    SellB => "sell_b",
    TakeProfit => "take_profit",
    VrBuy => "vr_buy",
    VrSell => "vr_sell",
});

/// 주문 상태 전이 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderStateError {
    /// 종결 상태에서 다시 전이 시도
    #[error("주문 {order_id} 상태 전이 불가: {from} → {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
}

/// 주문 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub position_id: Uuid,
    pub side: OrderSide,
    /// 회차 (해당 없으면 None)
    pub round: Option<u32>,
    pub price: Decimal,
    pub quantity: i64,
    pub amount: Decimal,
    pub kind: OrderKind,
    /// 증권사 주문번호 (접수 전 None)
    pub order_id: Option<String>,
    pub status: OrderStatus,
    pub sub_type: Option<OrderSubType>,
    /// 주문 시점에 포지션 상태가 전량 체결을 가정해 이미 갱신되었는지
    pub optimistic: bool,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    /// 실현 손익 (매도만)
    pub profit: Option<Decimal>,
    /// 미체결/취소 사유 등 메모
    pub note: Option<String>,
}

impl OrderRecord {
    /// 새 대기 주문 기록 생성. `amount = price × quantity`.
    pub fn pending(
        position_id: Uuid,
        side: OrderSide,
        kind: OrderKind,
        price: Decimal,
        quantity: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            side,
            round: None,
            price,
            quantity,
            amount: price * Decimal::from(quantity),
            kind,
            order_id: None,
            status: OrderStatus::Pending,
            sub_type: None,
            optimistic: false,
            created_at: Utc::now(),
            filled_at: None,
            profit: None,
            note: None,
        }
    }

    /// 회차 지정.
    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// 세부 태그 지정.
    pub fn with_sub_type(mut self, sub_type: OrderSubType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }

    /// 증권사 주문번호 지정.
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// 낙관적 반영 여부 지정.
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    /// 대기 상태인지 확인.
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), OrderStateError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderStateError::InvalidTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// 체결 처리 (실제 체결가/수량/시각 반영).
    pub fn mark_filled(
        &mut self,
        price: Decimal,
        quantity: i64,
        filled_at: DateTime<Utc>,
    ) -> Result<(), OrderStateError> {
        self.transition(OrderStatus::Filled)?;
        self.price = price;
        self.quantity = quantity;
        self.amount = price * Decimal::from(quantity);
        self.filled_at = Some(filled_at);
        Ok(())
    }

    /// 미체결/취소 처리 (사유 메모 포함).
    pub fn mark_expired(
        &mut self,
        status: OrderStatus,
        note: impl Into<String>,
    ) -> Result<(), OrderStateError> {
        self.transition(status)?;
        self.note = Some(note.into());
        Ok(())
    }
}
