//! 실행 로그 기록.
//!
//! 모든 작업 결과는 tracing 로그와 실행 로그 저장소에 함께 남깁니다.
//! 저장소 쓰기 실패는 작업 결과를 바꾸지 않습니다 (경고 로그만).

use std::sync::Arc;

use tracing::{error, info, warn};
use trader_core::{ExecutionLog, JobType, LogStatus};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::store::ExecutionLogSink;

/// 실행 로그 기록기
#[derive(Clone)]
pub struct ExecLogger {
    sink: Arc<dyn ExecutionLogSink>,
}

impl ExecLogger {
    pub fn new(sink: Arc<dyn ExecutionLogSink>) -> Self {
        Self { sink }
    }

    /// 로그 항목 기록.
    pub async fn record(&self, entry: ExecutionLog) {
        let position_id = entry.position_id.map(|id| id.to_string()).unwrap_or_default();
        match entry.status {
            LogStatus::Error => error!(
                job = %entry.job_type,
                position_id = %position_id,
                error = entry.error.as_deref().unwrap_or(""),
                "{}",
                entry.message
            ),
            LogStatus::Skipped => info!(
                job = %entry.job_type,
                position_id = %position_id,
                "건너뜀: {}",
                entry.message
            ),
            LogStatus::Started | LogStatus::Completed => info!(
                job = %entry.job_type,
                position_id = %position_id,
                "{}",
                entry.message
            ),
        }

        if let Err(e) = self.sink.append(&entry).await {
            warn!(job = %entry.job_type, error = %e, "실행 로그 저장 실패");
        }
    }

    /// 포지션 단위 결과 기록.
    pub async fn position(
        &self,
        job: JobType,
        position_id: Uuid,
        status: LogStatus,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let mut entry = ExecutionLog::new(job, status, message).with_position(position_id);
        if let Some(details) = details {
            entry = entry.with_details(details);
        }
        self.record(entry).await;
    }

    /// 포지션 단위 실패 기록. 건너뜀 계열 에러는 `skipped`로 남깁니다.
    pub async fn position_error(&self, job: JobType, position_id: Uuid, err: &SchedulerError) {
        let status = if err.is_skip() {
            LogStatus::Skipped
        } else {
            LogStatus::Error
        };
        let entry = ExecutionLog::new(job, status, err.to_string())
            .with_position(position_id)
            .with_error(err.to_string());
        self.record(entry).await;
    }

    /// 배치 단위 기록.
    pub async fn batch(
        &self,
        job: JobType,
        status: LogStatus,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let mut entry = ExecutionLog::new(job, status, message);
        if let Some(details) = details {
            entry = entry.with_details(details);
        }
        self.record(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn throttled_errors_are_recorded_as_skipped() {
        let store = Arc::new(MemoryStore::new());
        let logger = ExecLogger::new(store.clone());
        let position_id = Uuid::new_v4();

        logger
            .position_error(
                JobType::BasicBuy,
                position_id,
                &SchedulerError::TokenIssuanceThrottled("쿨다운".to_string()),
            )
            .await;
        logger
            .position_error(
                JobType::BasicBuy,
                position_id,
                &SchedulerError::Network("timeout".to_string()),
            )
            .await;

        let logs = store.logs().await;
        assert_eq!(logs[0].status, LogStatus::Skipped);
        assert_eq!(logs[1].status, LogStatus::Error);
        assert_eq!(logs[1].position_id, Some(position_id));
    }
}
