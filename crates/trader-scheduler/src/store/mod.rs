//! 포지션/주문/인증 정보/실행 로그 저장소.
//!
//! ```text
//! store
//! ├── PositionStore     // 포지션 + 주문 기록 (원자적 다중 쓰기 포함)
//! ├── CredentialStore   // 복호화된 인증 정보 조회, 갱신 토큰 기록
//! ├── ExecutionLogSink  // 실행 로그 추가/조회/보존 기간 정리
//! ├── memory            // 테스트/드라이런용 메모리 구현
//! └── postgres          // sqlx PostgreSQL 구현
//! ```

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use trader_core::{
    Credential, ExecutionLog, JobType, LogStatus, OrderRecord, OrderSide, OrderStatus, Position,
    PositionStatus, StrategyKind,
};
use uuid::Uuid;

use crate::error::StoreError;

/// 포지션 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub status: Option<PositionStatus>,
    pub auto_enabled: Option<bool>,
    pub strategy: Option<StrategyKind>,
}

impl PositionFilter {
    /// 자동매매 대상 (매수 중 + 자동 활성화) 포지션.
    pub fn active(strategy: StrategyKind) -> Self {
        Self {
            status: Some(PositionStatus::Buying),
            auto_enabled: Some(true),
            strategy: Some(strategy),
        }
    }

    pub fn matches(&self, position: &Position) -> bool {
        self.status.map_or(true, |s| position.status == s)
            && self.auto_enabled.map_or(true, |a| position.auto_enabled == a)
            && self.strategy.map_or(true, |s| position.strategy == s)
    }
}

/// 주문 기록 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub position_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub side: Option<OrderSide>,
    /// 생성 시각 하한 (포함)
    pub created_from: Option<DateTime<Utc>>,
    /// 생성 시각 상한 (미포함)
    pub created_to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(OrderStatus::Pending),
            ..Default::default()
        }
    }

    pub fn for_position(mut self, position_id: Uuid) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub fn side(mut self, side: OrderSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    pub fn matches(&self, record: &OrderRecord) -> bool {
        self.position_id.map_or(true, |id| record.position_id == id)
            && self.status.map_or(true, |s| record.status == s)
            && self.side.map_or(true, |s| record.side == s)
            && self.created_from.map_or(true, |t| record.created_at >= t)
            && self.created_to.map_or(true, |t| record.created_at < t)
    }
}

/// 실행 로그 조회 조건 (최신순 페이지네이션).
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub job_type: Option<JobType>,
    pub status: Option<LogStatus>,
    pub position_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            job_type: None,
            status: None,
            position_id: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl LogQuery {
    pub fn matches(&self, entry: &ExecutionLog) -> bool {
        self.job_type.map_or(true, |j| entry.job_type == j)
            && self.status.map_or(true, |s| entry.status == s)
            && self.position_id.map_or(true, |id| entry.position_id == Some(id))
            && self.from.map_or(true, |t| entry.created_at >= t)
            && self.to.map_or(true, |t| entry.created_at < t)
    }
}

/// 포지션/주문 기록 저장소.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError>;

    async fn upsert_position(&self, position: &Position) -> Result<(), StoreError>;

    async fn list_positions(&self, filter: &PositionFilter) -> Result<Vec<Position>, StoreError>;

    async fn create_order(&self, record: &OrderRecord) -> Result<(), StoreError>;

    async fn update_order(&self, record: &OrderRecord) -> Result<(), StoreError>;

    /// 생성 시각 오름차순.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRecord>, StoreError>;

    /// 포지션 갱신 + 주문 기록 추가를 함께 (모두 성공하거나 모두 실패).
    async fn save_position_with_orders(
        &self,
        position: &Position,
        orders: &[OrderRecord],
    ) -> Result<(), StoreError>;

    /// 주문 기록 갱신 + 포지션 갱신을 함께 (대사 결과 반영).
    async fn settle_order(
        &self,
        record: &OrderRecord,
        position: Option<&Position>,
    ) -> Result<(), StoreError>;
}

/// 인증 정보 저장소 (KIS).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 사용자 인증 정보 (복호화된 값).
    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError>;

    /// 재발급된 접근 토큰 기록.
    async fn update_token(
        &self,
        user_id: Uuid,
        access_token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// 실행 로그 저장소.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn append(&self, entry: &ExecutionLog) -> Result<(), StoreError>;

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLog>, StoreError>;

    /// 기준 시각 이전 로그 삭제. 삭제 건수 반환.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
