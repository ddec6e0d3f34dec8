//! cron 트리거 등록.
//!
//! 모든 트리거는 KST(Asia/Seoul) 기준 6필드 cron 표현식이며, 실제 실행 여부는
//! 트리거 시점의 미국 거래일로 다시 판단합니다.
//!
//! ```text
//! trigger            gate            job
//! basic_buy       →  RegularClose →  BasicBuy
//! basic_buy_early →  EarlyClose   →  BasicBuy
//! loc_buy         →  RegularClose →  LocBuy
//! loc_buy_early   →  EarlyClose   →  LocBuy
//! price_check     →  MarketHours  →  PriceCheck
//! reconcile       →  MarketHours  →  Reconcile
//! reconcile_close →  RegularClose →  ReconcileClose
//! reconcile_early →  EarlyClose   →  ReconcileClose
//! log_prune       →  Always       →  LogPrune
//! ```
//!
//! 거래일 조건으로 건너뛴 실행과 이전 실행이 남아 있어 건너뛴 실행은 실행 로그에
//! `skipped`로 남깁니다. 장 시간 밖의 주기 트리거는 tracing 로그만 남깁니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Seoul;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};
use trader_core::{LogStatus, MarketCalendar};

use crate::config::CronConfig;
use crate::engine::Engine;
use crate::error::{Result, SchedulerError};
use crate::jobs::{self, JobKind};

/// 트리거 실행 조건.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// 항상 실행
    Always,
    /// 미국 거래일
    TradingDay,
    /// 정규 마감 거래일 (조기폐장일 제외)
    RegularClose,
    /// 조기폐장일
    EarlyClose,
    /// 정규장 시간 중
    MarketHours,
}

impl Gate {
    /// 트리거 시점에 실행해도 되는지 확인.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let date = MarketCalendar::us_trading_date(now);
        match self {
            Self::Always => true,
            Self::TradingDay => MarketCalendar::is_open(date),
            Self::RegularClose => {
                MarketCalendar::is_open(date) && !MarketCalendar::is_early_close(date)
            }
            Self::EarlyClose => MarketCalendar::is_early_close(date),
            Self::MarketHours => MarketCalendar::is_market_hours(now),
        }
    }

    /// 건너뛴 실행을 실행 로그에 남길지 (하루 단위 조건만).
    fn records_skip(&self) -> bool {
        matches!(self, Self::TradingDay | Self::RegularClose | Self::EarlyClose)
    }
}

/// 등록할 트리거 하나.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub name: &'static str,
    pub expression: String,
    pub gate: Gate,
    pub kind: JobKind,
}

/// 설정의 cron 표현식으로 트리거 목록 구성.
pub fn triggers(cron: &CronConfig) -> Vec<Trigger> {
    let trigger = |name, expression: &String, gate, kind| Trigger {
        name,
        expression: expression.clone(),
        gate,
        kind,
    };

    vec![
        trigger("basic_buy", &cron.basic_buy, Gate::RegularClose, JobKind::BasicBuy),
        trigger(
            "basic_buy_early",
            &cron.basic_buy_early,
            Gate::EarlyClose,
            JobKind::BasicBuy,
        ),
        trigger("loc_buy", &cron.loc_buy, Gate::RegularClose, JobKind::LocBuy),
        trigger("loc_buy_early", &cron.loc_buy_early, Gate::EarlyClose, JobKind::LocBuy),
        trigger("price_check", &cron.price_check, Gate::MarketHours, JobKind::PriceCheck),
        trigger("reconcile", &cron.reconcile, Gate::MarketHours, JobKind::Reconcile),
        trigger(
            "reconcile_close",
            &cron.reconcile_close,
            Gate::RegularClose,
            JobKind::ReconcileClose,
        ),
        trigger(
            "reconcile_early",
            &cron.reconcile_early,
            Gate::EarlyClose,
            JobKind::ReconcileClose,
        ),
        trigger("log_prune", &cron.log_prune, Gate::Always, JobKind::LogPrune),
    ]
}

/// 트리거 한 번 실행.
///
/// 같은 트리거의 이전 실행이 끝나지 않았으면 이번 실행은 건너뜁니다.
async fn fire(
    engine: &Engine,
    name: &'static str,
    gate: Gate,
    kind: JobKind,
    running: &Mutex<()>,
    now: DateTime<Utc>,
) {
    if !gate.allows(now) {
        debug!(trigger = name, gate = ?gate, "실행 조건 불충족, 건너뜀");
        if gate.records_skip() {
            engine
                .logger()
                .batch(
                    kind.job_type(),
                    LogStatus::Skipped,
                    format!(
                        "{} 건너뜀: {} 거래일 조건({:?}) 불충족",
                        name,
                        MarketCalendar::us_trading_date(now),
                        gate
                    ),
                    None,
                )
                .await;
        }
        return;
    }

    let Ok(_guard) = running.try_lock() else {
        engine
            .logger()
            .batch(
                kind.job_type(),
                LogStatus::Skipped,
                format!("{} 건너뜀: 이전 실행이 아직 진행 중", name),
                None,
            )
            .await;
        return;
    };

    info!(trigger = name, job = %kind, "스케줄 작업 시작");
    if let Err(e) = jobs::run(engine, kind).await {
        error!(trigger = name, job = %kind, error = %e, "스케줄 작업 실패");
    }
}

/// 트리거 하나를 비동기 작업으로 생성.
fn create_job(trigger: Trigger, engine: Arc<Engine>) -> Result<Job> {
    let running = Arc::new(Mutex::new(()));
    let Trigger {
        name,
        expression,
        gate,
        kind,
    } = trigger;

    debug!(trigger = name, cron = %expression, "cron 작업 생성");

    let job = Job::new_async_tz(expression.as_str(), Seoul, move |_uuid, _lock| {
        let engine = Arc::clone(&engine);
        let running = Arc::clone(&running);

        Box::pin(async move {
            fire(&engine, name, gate, kind, &running, Utc::now()).await;
        })
    })
    .map_err(|e| SchedulerError::Scheduling(format!("{} ({}): {}", name, expression, e)))?;

    Ok(job)
}

/// 모든 트리거를 등록하고 스케줄러 시작.
pub async fn start(engine: Arc<Engine>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    for trigger in triggers(&engine.config().cron) {
        let name = trigger.name;
        let expression = trigger.expression.clone();
        let job = create_job(trigger, Arc::clone(&engine))?;
        scheduler.add(job).await?;
        info!(trigger = name, cron = %expression, "cron 작업 등록");
    }

    scheduler.start().await?;
    info!("스케줄러 시작 (Asia/Seoul)");
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::SchedulerConfig;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn every_configured_expression_becomes_a_trigger() {
        let config = SchedulerConfig::default();
        let triggers = triggers(&config.cron);
        assert_eq!(triggers.len(), 9);
        assert!(triggers
            .iter()
            .all(|t| t.expression.split_whitespace().count() == 6));
        assert_eq!(
            triggers
                .iter()
                .filter(|t| t.kind == JobKind::ReconcileClose)
                .count(),
            2
        );
        assert_eq!(
            triggers
                .iter()
                .filter(|t| t.kind == JobKind::BasicBuy)
                .map(|t| t.gate)
                .collect::<Vec<_>>(),
            vec![Gate::RegularClose, Gate::EarlyClose]
        );
    }

    #[test]
    fn close_gates_split_regular_and_early_days() {
        // 2024-11-29 (추수감사절 다음날) 12:30 EST = 17:30 UTC
        let early = utc(2024, 11, 29, 17, 30);
        assert!(Gate::EarlyClose.allows(early));
        assert!(!Gate::RegularClose.allows(early));
        assert!(Gate::TradingDay.allows(early));

        // 2024-11-27 15:00 EST = 20:00 UTC
        let regular = utc(2024, 11, 27, 20, 0);
        assert!(Gate::RegularClose.allows(regular));
        assert!(!Gate::EarlyClose.allows(regular));
    }

    #[test]
    fn holidays_and_after_hours_are_gated() {
        // 2024-07-04 독립기념일
        let holiday = utc(2024, 7, 4, 15, 0);
        assert!(!Gate::TradingDay.allows(holiday));
        assert!(!Gate::MarketHours.allows(holiday));
        assert!(Gate::Always.allows(holiday));

        // 2024-07-01 10:00 EDT = 14:00 UTC, 17:30 EDT = 21:30 UTC
        assert!(Gate::MarketHours.allows(utc(2024, 7, 1, 14, 0)));
        assert!(!Gate::MarketHours.allows(utc(2024, 7, 1, 21, 30)));
    }

    fn engine(store: Arc<crate::store::MemoryStore>) -> Engine {
        let factory = Arc::new(trader_exchange::MockBrokerFactory::new(Arc::new(
            trader_exchange::MockBroker::new(),
        )));
        Engine::new(
            SchedulerConfig::default(),
            store.clone(),
            store.clone(),
            store,
            factory,
        )
    }

    #[test]
    fn invalid_expression_is_a_scheduling_error() {
        let engine = engine(Arc::new(crate::store::MemoryStore::new()));
        let trigger = Trigger {
            name: "broken",
            expression: "not a cron".to_string(),
            gate: Gate::Always,
            kind: JobKind::LogPrune,
        };
        assert!(matches!(
            create_job(trigger, Arc::new(engine)),
            Err(SchedulerError::Scheduling(_))
        ));
    }

    #[tokio::test]
    async fn holiday_skip_is_written_to_execution_log() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = engine(store.clone());
        let running = Mutex::new(());

        // 2024-07-04 독립기념일
        let holiday = utc(2024, 7, 4, 15, 0);
        fire(&engine, "basic_buy", Gate::RegularClose, JobKind::BasicBuy, &running, holiday).await;

        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Skipped);
        assert_eq!(logs[0].job_type, trader_core::JobType::BasicBuy);
        assert!(logs[0].message.contains("2024-07-04"));
    }

    #[tokio::test]
    async fn after_hours_tick_leaves_no_log_entry() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = engine(store.clone());
        let running = Mutex::new(());

        // 2024-07-01 17:30 EDT
        let after_hours = utc(2024, 7, 1, 21, 30);
        fire(&engine, "price_check", Gate::MarketHours, JobKind::PriceCheck, &running, after_hours)
            .await;

        assert!(store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn overlapping_run_is_skipped_and_logged() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = engine(store.clone());
        let running = Mutex::new(());
        let _held = running.lock().await;

        fire(&engine, "log_prune", Gate::Always, JobKind::LogPrune, &running, Utc::now()).await;

        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Skipped);
        assert!(logs[0].message.contains("진행 중"));
    }
}
