//! 작업 실행 엔진.
//!
//! 포지션을 사용자(계좌) 단위로 묶고, 계좌마다 브로커 세션을 한 번 연 뒤
//! 포지션을 순차 처리합니다.
//!
//! ```text
//! run_positions
//! ├── 계좌 그룹 (ACCOUNT_CONCURRENCY 만큼 동시 실행, 기본 1 = 순차)
//! │   ├── open_session: 인증 정보 → 브로커 → 토큰 (쿨다운 확인)
//! │   └── 포지션 순차 처리 (POSITION_DELAY_MS 간격)
//! │       ├── Done    → success
//! │       ├── Skipped → skipped
//! │       └── Err     → is_skip() ? skipped : errors  (배치는 계속)
//! └── BatchStats 병합
//! ```
//!
//! 포지션을 바꾸는 작업은 [`Engine::lock_positions`]로 한 번에 하나씩만 실행됩니다.
//! 같은 프로세스 안에서만 유효하며, 별도 프로세스의 수동 실행과는 경합할 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use trader_core::{Credential, JobType, LogStatus, MarketCalendar, OrderSide, Position};
use trader_exchange::{BrokerFactory, OverseasBroker};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::cooldown::TokenCooldown;
use crate::error::{Result, SchedulerError};
use crate::exec_log::ExecLogger;
use crate::notifier::{spawn_notify, Notification, Notifier, TracingNotifier};
use crate::stats::BatchStats;
use crate::store::{CredentialStore, ExecutionLogSink, OrderFilter, PositionStore};

/// 포지션 하나의 처리 결과.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 주문 제출 또는 상태 반영 완료
    Done {
        message: String,
        orders_placed: usize,
        details: Option<serde_json::Value>,
    },
    /// 조건 불충족 등으로 건너뜀
    Skipped {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl Outcome {
    pub fn done(message: impl Into<String>, orders_placed: usize) -> Self {
        Self::Done {
            message: message.into(),
            orders_placed,
            details: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::Skipped {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, value: serde_json::Value) -> Self {
        match &mut self {
            Self::Done { details, .. } | Self::Skipped { details, .. } => *details = Some(value),
        }
        self
    }
}

/// 포지션 단위 작업.
#[async_trait]
pub trait PositionJob: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn run(
        &self,
        engine: &Engine,
        broker: &dyn OverseasBroker,
        position: Position,
    ) -> Result<Outcome>;
}

/// 스케줄러 실행 엔진.
pub struct Engine {
    config: SchedulerConfig,
    positions: Arc<dyn PositionStore>,
    credentials: Arc<dyn CredentialStore>,
    logger: ExecLogger,
    logs: Arc<dyn ExecutionLogSink>,
    factory: Arc<dyn BrokerFactory>,
    notifier: Arc<dyn Notifier>,
    cooldown: TokenCooldown,
    position_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        config: SchedulerConfig,
        positions: Arc<dyn PositionStore>,
        credentials: Arc<dyn CredentialStore>,
        logs: Arc<dyn ExecutionLogSink>,
        factory: Arc<dyn BrokerFactory>,
    ) -> Self {
        let cooldown = TokenCooldown::new(config.trading.token_cooldown());
        Self {
            config,
            positions,
            credentials,
            logger: ExecLogger::new(logs.clone()),
            logs,
            factory,
            notifier: Arc::new(TracingNotifier),
            cooldown,
            position_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn positions(&self) -> &Arc<dyn PositionStore> {
        &self.positions
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn logs(&self) -> &Arc<dyn ExecutionLogSink> {
        &self.logs
    }

    pub fn logger(&self) -> &ExecLogger {
        &self.logger
    }

    pub fn cooldown(&self) -> &TokenCooldown {
        &self.cooldown
    }

    /// 포지션 변경 작업 잠금. 읽기-계산-쓰기 구간 전체를 감쌉니다.
    pub async fn lock_positions(&self) -> MutexGuard<'_, ()> {
        self.position_lock.lock().await
    }

    /// 브로커 세션 생성 (토큰 발급 없음).
    pub fn connect(&self, credential: &Credential) -> Result<Arc<dyn OverseasBroker>> {
        Ok(self.factory.connect(credential)?)
    }

    /// 알림 전송 (기다리지 않음).
    pub fn notify(&self, notification: Notification) {
        spawn_notify(&self.notifier, notification);
    }

    /// 사용자 브로커 세션 열기.
    ///
    /// 토큰이 없거나 만료되었으면 쿨다운을 확인한 뒤 한 번만 발급을 시도합니다.
    pub async fn open_session(&self, user_id: Uuid) -> Result<Arc<dyn OverseasBroker>> {
        let credential = self
            .credentials
            .get_credential(user_id)
            .await?
            .ok_or(SchedulerError::CredentialMissing(user_id))?;

        let broker = self.connect(&credential)?;
        if broker.is_token_valid().await {
            return Ok(broker);
        }

        if let Some(remaining) = self.cooldown.active(user_id).await {
            return Err(SchedulerError::TokenIssuanceThrottled(format!(
                "토큰 발급 쿨다운 중 ({}초 남음)",
                remaining.as_secs()
            )));
        }

        self.cooldown.start(user_id).await;
        debug!(user_id = %user_id, "접근 토큰 발급 시도");
        broker.ensure_token().await?;
        Ok(broker)
    }

    /// 오늘(ET 거래일) 이미 매수 기록이 있는지 확인.
    pub async fn bought_today(&self, position_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.ordered_today(position_id, OrderSide::Buy, now).await
    }

    /// 오늘(ET 거래일) 해당 방향 주문 기록이 있는지 확인.
    pub async fn ordered_today(
        &self,
        position_id: Uuid,
        side: OrderSide,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (from, to) = trading_day_bounds(MarketCalendar::us_trading_date(now));
        let filter = OrderFilter::default()
            .for_position(position_id)
            .side(side)
            .created_between(from, to);
        Ok(!self.positions.list_orders(&filter).await?.is_empty())
    }

    /// 포지션 목록에 작업 실행.
    pub async fn run_positions(&self, job: &dyn PositionJob, positions: Vec<Position>) -> BatchStats {
        let started = Instant::now();
        let groups = group_by_user(positions);
        let concurrency = self.config.trading.account_concurrency.max(1);

        info!(
            job = %job.job_type(),
            accounts = groups.len(),
            concurrency,
            "작업 시작"
        );

        let results: Vec<BatchStats> = stream::iter(groups)
            .map(|(user_id, group)| self.run_group(job, user_id, group))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut stats = BatchStats::new();
        for group_stats in &results {
            stats.merge(group_stats);
        }
        stats.elapsed = started.elapsed();
        stats
    }

    async fn run_group(
        &self,
        job: &dyn PositionJob,
        user_id: Uuid,
        positions: Vec<Position>,
    ) -> BatchStats {
        let job_type = job.job_type();
        let mut stats = BatchStats {
            total: positions.len(),
            ..Default::default()
        };

        let broker = match self.open_session(user_id).await {
            Ok(broker) => broker,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "계좌 세션 열기 실패");
                for position in &positions {
                    self.logger.position_error(job_type, position.id, &e).await;
                }
                if e.is_skip() {
                    stats.skipped += positions.len();
                } else {
                    stats.errors += positions.len();
                }
                return stats;
            }
        };

        for (index, position) in positions.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.trading.position_delay()).await;
            }

            let position_id = position.id;
            let ticker = position.ticker.clone();
            match job.run(self, broker.as_ref(), position).await {
                Ok(Outcome::Done {
                    message,
                    orders_placed,
                    details,
                }) => {
                    stats.success += 1;
                    stats.orders_placed += orders_placed;
                    self.logger
                        .position(job_type, position_id, LogStatus::Completed, message, details)
                        .await;
                }
                Ok(Outcome::Skipped { message, details }) => {
                    stats.skipped += 1;
                    self.logger
                        .position(job_type, position_id, LogStatus::Skipped, message, details)
                        .await;
                }
                Err(e) => {
                    self.logger.position_error(job_type, position_id, &e).await;
                    if e.is_skip() {
                        stats.skipped += 1;
                    } else {
                        stats.errors += 1;
                        self.notify(Notification::error(
                            job_type.as_str(),
                            format!("{} 처리 실패", ticker),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        stats
    }
}

/// 사용자별로 포지션 묶기 (처음 등장한 순서 유지).
pub fn group_by_user(positions: Vec<Position>) -> Vec<(Uuid, Vec<Position>)> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<(Uuid, Vec<Position>)> = Vec::new();
    for position in positions {
        match index.get(&position.user_id) {
            Some(&i) => groups[i].1.push(position),
            None => {
                index.insert(position.user_id, groups.len());
                groups.push((position.user_id, vec![position]));
            }
        }
    }
    groups
}

/// ET 거래일의 UTC 범위 [시작, 다음날 시작).
pub fn trading_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_of = |d: NaiveDate| {
        New_York
            .from_local_datetime(&d.and_time(chrono::NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
    };
    (start_of(date), start_of(date + Duration::days(1)))
}
