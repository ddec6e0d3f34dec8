//! 스케줄 작업.
//!
//! ```text
//! jobs
//! ├── basic        // 기본 전략 일일 매수
//! ├── loc_split    // LOC 분할 매수 → 매도 (VR 사이클 포함)
//! ├── vr           // VR 사이클 (사다리 주문)
//! ├── price_check  // 현재가 점검 / 기본 전략 자동 익절
//! ├── diagnostics  // 매수 가능 여부 설명 (읽기 전용)
//! └── prune        // 실행 로그 정리
//! ```

pub mod basic;
pub mod diagnostics;
pub mod loc_split;
pub mod price_check;
pub mod prune;
pub mod vr;

use std::fmt;

use chrono::Utc;
use tracing::info;
use trader_core::{JobType, LogStatus, Position};
use trader_exchange::{OrderRequest, OverseasBroker, PlacedOrder};
use trader_strategy::OrderIntent;

use crate::engine::Engine;
use crate::error::Result;
use crate::reconcile::{self, ReconcileMode};
use crate::stats::BatchStats;

/// 이름으로 실행할 수 있는 작업.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobKind {
    /// 기본 전략 일일 매수
    BasicBuy,
    /// LOC 분할 매수 + VR 사이클
    LocBuy,
    /// 현재가 점검 / 자동 익절
    PriceCheck,
    /// 장중 체결 대사
    Reconcile,
    /// 장 마감 후 체결 대사 (LOC 즉시 만료)
    ReconcileClose,
    /// 실행 로그 정리
    LogPrune,
}

impl JobKind {
    /// 포지션/주문 상태를 바꾸는 작업인지 (엔진 잠금 대상).
    pub fn mutates_positions(&self) -> bool {
        !matches!(self, Self::LogPrune)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::BasicBuy => JobType::BasicBuy,
            Self::LocBuy => JobType::LocBuy,
            Self::PriceCheck => JobType::PriceCheck,
            Self::Reconcile | Self::ReconcileClose => JobType::Reconcile,
            Self::LogPrune => JobType::LogPrune,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BasicBuy => "basic-buy",
            Self::LocBuy => "loc-buy",
            Self::PriceCheck => "price-check",
            Self::Reconcile => "reconcile",
            Self::ReconcileClose => "reconcile-close",
            Self::LogPrune => "log-prune",
        };
        f.write_str(name)
    }
}

/// 작업 실행.
///
/// 포지션을 바꾸는 작업은 엔진 잠금을 잡은 뒤 시작하므로 서로 겹치지 않습니다.
/// 시작/완료/실패는 배치 단위 실행 로그로 남깁니다.
/// 배치 수준 실패(포지션 목록 조회 실패 등)만 에러로 반환하며,
/// 다음 스케줄 실행에는 영향을 주지 않습니다.
pub async fn run(engine: &Engine, kind: JobKind) -> Result<BatchStats> {
    let _guard = if kind.mutates_positions() {
        Some(engine.lock_positions().await)
    } else {
        None
    };

    let job_type = kind.job_type();
    engine
        .logger()
        .batch(job_type, LogStatus::Started, format!("{} 시작", kind), None)
        .await;

    let result = match kind {
        JobKind::BasicBuy => basic::run_daily_buy(engine).await,
        JobKind::LocBuy => loc_split::run_daily_cycle(engine).await,
        JobKind::PriceCheck => price_check::run(engine).await,
        JobKind::Reconcile => reconcile::run(engine, ReconcileMode::Intraday, Utc::now()).await,
        JobKind::ReconcileClose => {
            reconcile::run(engine, ReconcileMode::PostClose, Utc::now()).await
        }
        JobKind::LogPrune => prune::run(engine, Utc::now()).await,
    };

    match &result {
        Ok(stats) => {
            stats.log_summary(&kind.to_string());
            engine
                .logger()
                .batch(
                    job_type,
                    LogStatus::Completed,
                    format!(
                        "{} 완료: 대상 {}, 성공 {}, 건너뜀 {}, 에러 {}",
                        kind, stats.total, stats.success, stats.skipped, stats.errors
                    ),
                    Some(stats.to_details()),
                )
                .await
        }
        Err(e) => {
            engine
                .logger()
                .batch(
                    job_type,
                    LogStatus::Error,
                    format!("{} 배치 실패: {}", kind, e),
                    None,
                )
                .await
        }
    }
    result
}

/// 주문 의도를 증권사 주문으로 제출.
pub(crate) async fn submit(
    broker: &dyn OverseasBroker,
    position: &Position,
    intent: &OrderIntent,
) -> Result<PlacedOrder> {
    let request = OrderRequest {
        ticker: position.ticker.clone(),
        exchange: position.exchange,
        side: intent.side,
        kind: intent.kind,
        price: intent.price,
        quantity: intent.quantity,
    };
    let placed = broker.place_order(&request).await?;
    info!(
        ticker = %position.ticker,
        side = %intent.side,
        kind = %intent.kind,
        price = %intent.price,
        quantity = intent.quantity,
        order_id = %placed.order_id,
        "주문 접수"
    );
    Ok(placed)
}
