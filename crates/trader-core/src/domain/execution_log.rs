//! 스케줄러 실행 로그.
//!
//! 추가 전용(append-only)이며 보존 기간 경과로만 삭제됩니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

/// 작업 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// 기본 전략 일일 매수
    BasicBuy,
    /// LOC 분할 일일 매수 (정규/조기폐장)
    LocBuy,
    /// VR 사이클
    VrCycle,
    /// 현재가 점검 / 자동 익절
    PriceCheck,
    /// 체결 대사
    Reconcile,
    /// 실행 로그 정리
    LogPrune,
}

text_enum!(JobType, "job type" {
    BasicBuy => "basic_buy",
    LocBuy => "loc_buy",
    VrCycle => "vr_cycle",
    PriceCheck => "price_check",
    Reconcile => "reconcile",
    LogPrune => "log_prune",
});

/// 실행 결과 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Started,
    Completed,
    Skipped,
    Error,
}

text_enum!(LogStatus, "log status" {
    Started => "started",
    Completed => "completed",
    Skipped => "skipped",
    Error => "error",
});

/// 실행 로그 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: LogStatus,
    pub message: String,
    /// 관련 포지션 (배치 단위 로그면 None)
    pub position_id: Option<Uuid>,
    /// 구조화된 부가 정보
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(job_type: JobType, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            status,
            message: message.into(),
            position_id: None,
            details: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_position(mut self, position_id: Uuid) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
