use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{OrderKind, OrderRecord, OrderSide, OrderSubType};
use uuid::Uuid;

/// 전략이 만든 주문 의도.
///
/// 스케줄러가 거래소에 제출하고, 접수되면 [`OrderRecord`]로 저장합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub quantity: i64,
    pub sub_type: Option<OrderSubType>,
    pub round: Option<u32>,
}

impl OrderIntent {
    pub fn buy(kind: OrderKind, price: Decimal, quantity: i64) -> Self {
        Self {
            side: OrderSide::Buy,
            kind,
            price,
            quantity,
            sub_type: None,
            round: None,
        }
    }

    pub fn sell(kind: OrderKind, price: Decimal, quantity: i64) -> Self {
        Self {
            side: OrderSide::Sell,
            ..Self::buy(kind, price, quantity)
        }
    }

    pub fn tagged(mut self, sub_type: OrderSubType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// 주문 금액 (가격 × 수량).
    pub fn amount(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// 접수된 주문번호로 대기 주문 기록 생성.
    pub fn to_record(&self, position_id: Uuid, order_id: &str, optimistic: bool) -> OrderRecord {
        let mut record =
            OrderRecord::pending(position_id, self.side, self.kind, self.price, self.quantity)
                .with_order_id(order_id)
                .with_optimistic(optimistic);
        record.sub_type = self.sub_type;
        record.round = self.round;
        record
    }
}
