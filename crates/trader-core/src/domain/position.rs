//! 포지션 (추적 종목 + 전략 1개).
//!
//! 포지션은 외부(사용자 요청)에서 생성되고, 스케줄러가 성공한 사이클마다
//! 전략 엔진을 통해 한 번씩 갱신합니다. 익절로 전량 청산되면 `Completed`가 됩니다.
//!
//! # 불변 조건
//!
//! - `current_round <= total_rounds`
//! - `total_quantity * avg_price ≈ total_invested` (센트 반올림 오차 허용)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use crate::decimal::average_price;

/// 전략 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// 조건부 일일 매수
    Basic,
    /// 40분할 LOC 적립 (전반전/후반전)
    LocSplit,
    /// 밸류 리밸런싱 (VR)
    ValueRebalance,
    /// 그리드
    Grid,
}

text_enum!(StrategyKind, "strategy" {
    Basic => "basic",
    LocSplit => "loc_split",
    ValueRebalance => "value_rebalance",
    Grid => "grid",
});

/// 포지션 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// 매수 진행 중
    Buying,
    /// 익절 완료
    Completed,
}

text_enum!(PositionStatus, "position status" {
    Buying => "buying",
    Completed => "completed",
});

/// 기본 전략 매수 조건.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyCondition {
    /// 매일 매수
    #[default]
    Daily,
    /// 현재가 <= 전일 종가
    Loc,
    /// 첫 회차 또는 현재가 <= 평단 × 0.95
    Waterfall,
    /// 첫 회차: loc만, 이후: loc AND waterfall
    LocWaterfall,
}

text_enum!(BuyCondition, "buy condition" {
    Daily => "daily",
    Loc => "loc",
    Waterfall => "waterfall",
    LocWaterfall => "loc_waterfall",
});

/// 해외 거래소 코드.
///
/// 주문 API와 시세 API가 서로 다른 코드를 사용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExchangeCode {
    /// 나스닥
    #[default]
    Nasd,
    /// 뉴욕증권거래소
    Nyse,
    /// 아멕스
    Amex,
}

text_enum!(ExchangeCode, "exchange" {
    Nasd => "NASD",
    Nyse => "NYSE",
    Amex => "AMEX",
});

impl ExchangeCode {
    /// 주문/체결 조회용 코드 (NASD, NYSE, AMEX).
    pub fn order_code(&self) -> &'static str {
        self.as_str()
    }

    /// 시세 조회용 코드 (NAS, NYS, AMS).
    pub fn quote_code(&self) -> &'static str {
        match self {
            Self::Nasd => "NAS",
            Self::Nyse => "NYS",
            Self::Amex => "AMS",
        }
    }

    /// 주문 코드 또는 시세 코드에서 변환.
    pub fn from_any(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "NASD" | "NAS" => Some(Self::Nasd),
            "NYSE" | "NYS" => Some(Self::Nyse),
            "AMEX" | "AMS" => Some(Self::Amex),
            _ => None,
        }
    }
}

/// VR 운용 스타일.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VrStyle {
    /// 적립식 (주기마다 입금)
    Deposit,
    /// 거치식
    #[default]
    Hold,
    /// 인출식 (주기마다 출금)
    Withdraw,
}

text_enum!(VrStyle, "vr style" {
    Deposit => "deposit",
    Hold => "hold",
    Withdraw => "withdraw",
});

/// 밸류 리밸런싱 파라미터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrParams {
    /// 밴드 중심 목표 평가금 V
    pub v: Decimal,
    /// 현금 풀 P
    pub pool: Decimal,
    /// 기울기 G (10 또는 20)
    pub gradient: Decimal,
    /// 운용 스타일
    pub style: VrStyle,
    /// 밴드 폭 (%)
    pub band_percent: Decimal,
    /// 주기별 입/출금액
    pub deposit_amount: Decimal,
    /// 사이클 주기 (주)
    pub cycle_weeks: u32,
    /// 마지막 사이클 실행 시각
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl Default for VrParams {
    fn default() -> Self {
        Self {
            v: Decimal::ZERO,
            pool: Decimal::ZERO,
            gradient: dec!(10),
            style: VrStyle::Hold,
            band_percent: dec!(15),
            deposit_amount: Decimal::ZERO,
            cycle_weeks: 2,
            last_cycle_at: None,
        }
    }
}

/// 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// 소유 사용자 (인증 정보 조회 키)
    pub user_id: Uuid,
    pub ticker: String,
    pub exchange: ExchangeCode,
    pub strategy: StrategyKind,
    pub status: PositionStatus,
    /// 자동매매 활성화 여부
    pub auto_enabled: bool,
    pub current_round: u32,
    pub total_rounds: u32,
    /// 회차당 매수 금액
    pub buy_amount: Decimal,
    pub total_invested: Decimal,
    pub total_quantity: i64,
    pub avg_price: Decimal,
    /// 익절 목표 수익률 (%)
    pub target_profit_pct: Decimal,
    /// 기본 전략 매수 조건
    pub buy_condition: BuyCondition,
    /// VR 전략 파라미터
    pub vr: Option<VrParams>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// 빈 포지션 생성.
    pub fn new(
        user_id: Uuid,
        ticker: impl Into<String>,
        exchange: ExchangeCode,
        strategy: StrategyKind,
        buy_amount: Decimal,
        total_rounds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            ticker: ticker.into(),
            exchange,
            strategy,
            status: PositionStatus::Buying,
            auto_enabled: true,
            current_round: 0,
            total_rounds,
            buy_amount,
            total_invested: Decimal::ZERO,
            total_quantity: 0,
            avg_price: Decimal::ZERO,
            target_profit_pct: dec!(10),
            buy_condition: BuyCondition::Daily,
            vr: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 매수 조건 설정.
    pub fn with_buy_condition(mut self, condition: BuyCondition) -> Self {
        self.buy_condition = condition;
        self
    }

    /// 익절 목표 설정.
    pub fn with_target_profit(mut self, pct: Decimal) -> Self {
        self.target_profit_pct = pct;
        self
    }

    /// VR 파라미터 설정.
    pub fn with_vr(mut self, params: VrParams) -> Self {
        self.vr = Some(params);
        self
    }

    /// 남은 회차가 있는지 확인.
    pub fn has_rounds_left(&self) -> bool {
        self.current_round < self.total_rounds
    }

    /// 첫 회차 여부.
    pub fn is_first_round(&self) -> bool {
        self.current_round == 0
    }

    /// 보유 수량 존재 여부.
    pub fn has_holdings(&self) -> bool {
        self.total_quantity > 0
    }

    /// 보유 원가 (평단 × 수량).
    pub fn cost_basis(&self, quantity: i64) -> Decimal {
        self.avg_price * Decimal::from(quantity)
    }

    /// 매수 반영 (투자금/수량 증가 후 평단 재계산).
    pub fn add_holdings(&mut self, quantity: i64, amount: Decimal) {
        self.total_invested += amount;
        self.total_quantity += quantity;
        self.recompute_avg_price();
    }

    /// 보유분 차감 (매도 또는 가정 취소).
    ///
    /// 수량이 0 이하가 되면 투자금/평단도 0으로 맞춥니다.
    pub fn remove_holdings(&mut self, quantity: i64, amount: Decimal) {
        self.total_quantity -= quantity;
        self.total_invested -= amount;
        if self.total_quantity <= 0 {
            self.total_quantity = 0;
            self.total_invested = Decimal::ZERO;
        }
        if self.total_invested < Decimal::ZERO {
            self.total_invested = Decimal::ZERO;
        }
        self.recompute_avg_price();
    }

    /// 평단 재계산.
    pub fn recompute_avg_price(&mut self) {
        self.avg_price = average_price(self.total_invested, self.total_quantity);
        self.touch();
    }

    /// 전량 청산 후 초기화 (회차/평단/수량 0, 완료 상태).
    pub fn reset_after_liquidation(&mut self) {
        self.current_round = 0;
        self.total_invested = Decimal::ZERO;
        self.total_quantity = 0;
        self.avg_price = Decimal::ZERO;
        self.status = PositionStatus::Completed;
        self.touch();
    }

    /// 수정 시각 갱신.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
