//! 실행 로그 정리.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use trader_core::{JobType, LogStatus};

use crate::engine::Engine;
use crate::error::Result;
use crate::stats::BatchStats;

/// 보존 기간(`LOG_RETENTION_DAYS`)이 지난 실행 로그 삭제.
pub async fn run(engine: &Engine, now: DateTime<Utc>) -> Result<BatchStats> {
    let days = engine.config().log_retention_days.max(1);
    let cutoff = now - Duration::days(days);
    let removed = engine.logs().prune_before(cutoff).await?;
    let evicted = engine.cooldown().evict_expired().await;

    engine
        .logger()
        .batch(
            JobType::LogPrune,
            LogStatus::Completed,
            format!("실행 로그 {}건 삭제 ({}일 이전)", removed, days),
            Some(json!({ "cutoff": cutoff, "removed": removed, "cooldown_evicted": evicted })),
        )
        .await;

    Ok(BatchStats {
        total: 1,
        success: 1,
        ..Default::default()
    })
}
