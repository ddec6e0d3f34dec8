//! 해외주식 자동매매 스케줄러 CLI.

use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trader_core::{JobType, LogStatus, MarketCalendar};
use trader_exchange::KisBrokerFactory;
use trader_scheduler::{
    cron, jobs, CredentialStore, Engine, ExecutionLogSink, JobKind, LogQuery, MemoryStore,
    Notifier, PgStore, PositionStore, SchedulerConfig, SchedulerError, StoreTokenHook,
    WebhookNotifier,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "trader-scheduler")]
#[command(about = "KIS 해외주식 자동매매 스케줄러", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (RUST_LOG가 있으면 무시)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// cron 트리거를 등록하고 Ctrl+C까지 실행
    Daemon,

    /// 작업 하나를 즉시 실행
    Run {
        /// 실행할 작업
        #[arg(value_enum)]
        job: JobKind,
    },

    /// 매수 가능 여부 진단 (주문/토큰 발급 없음)
    Diagnose {
        /// 대상 포지션 (없으면 전체)
        #[arg(long)]
        position: Option<Uuid>,
    },

    /// 미국 증시 캘린더 / 다음 정산 시각
    Calendar {
        /// 확인할 ET 날짜 (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// 실행 로그 조회 (최신순)
    Logs {
        /// 작업 종류 (basic_buy, loc_buy, vr_cycle, price_check, reconcile, log_prune)
        #[arg(long)]
        job: Option<JobType>,

        /// 상태 (started, completed, skipped, error)
        #[arg(long)]
        status: Option<LogStatus>,

        /// 포지션 ID
        #[arg(long)]
        position: Option<Uuid>,

        /// 최대 건수
        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

/// 데이터베이스 URL에서 비밀번호 마스킹.
fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            return format!("{}****{}", &url[..colon_pos + 1], &url[at_pos..]);
        }
    }
    "****".to_string()
}

type Stores = (
    Arc<dyn PositionStore>,
    Arc<dyn CredentialStore>,
    Arc<dyn ExecutionLogSink>,
);

fn split_store<S>(store: Arc<S>) -> Stores
where
    S: PositionStore + CredentialStore + ExecutionLogSink + 'static,
{
    let positions: Arc<dyn PositionStore> = store.clone();
    let credentials: Arc<dyn CredentialStore> = store.clone();
    let logs: Arc<dyn ExecutionLogSink> = store;
    (positions, credentials, logs)
}

/// DATABASE_URL이 있으면 PostgreSQL, 없으면 메모리 저장소.
async fn open_stores(config: &SchedulerConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            tracing::debug!(database_url = %mask_database_url(url), "데이터베이스 연결");
            let store = PgStore::connect(url)
                .await
                .context("데이터베이스 연결 실패")?;
            store.migrate().await.context("마이그레이션 실패")?;
            Ok(split_store(Arc::new(store)))
        }
        None => {
            tracing::warn!("DATABASE_URL 없음, 메모리 저장소 사용 (재시작 시 데이터 유실)");
            Ok(split_store(Arc::new(MemoryStore::new())))
        }
    }
}

async fn build_engine(config: SchedulerConfig) -> anyhow::Result<Engine> {
    let (positions, credentials, logs) = open_stores(&config).await?;

    let mut factory = KisBrokerFactory::new(config.broker.price_cache_ttl())?
        .with_hook(Arc::new(StoreTokenHook::new(credentials.clone())))
        .with_aux_timeout(config.broker.aux_timeout());
    if let Some(interval) = config.broker.min_call_interval() {
        factory = factory.with_min_interval(interval);
    }

    let notifier: Option<Arc<dyn Notifier>> = config
        .notify_webhook_url
        .as_deref()
        .map(|url| Arc::new(WebhookNotifier::new(url)) as Arc<dyn Notifier>);

    let engine = Engine::new(config, positions, credentials, logs, Arc::new(factory));
    Ok(match notifier {
        Some(notifier) => engine.with_notifier(notifier),
        None => engine,
    })
}

fn print_calendar(date: Option<NaiveDate>) -> anyhow::Result<()> {
    let now = Utc::now();
    let date = date.unwrap_or_else(|| MarketCalendar::us_trading_date(now));

    let state = match MarketCalendar::holiday_name(date) {
        Some(name) => format!("휴장 ({})", name),
        None if MarketCalendar::is_weekend(date) => "주말".to_string(),
        None if MarketCalendar::is_early_close(date) => format!(
            "조기폐장 ({} ET)",
            MarketCalendar::close_time_et(date).format("%H:%M")
        ),
        None => format!(
            "정규장 ({} ET)",
            MarketCalendar::close_time_et(date).format("%H:%M")
        ),
    };
    println!("{} {}", date, state);
    println!("KST 시차: +{}시간", MarketCalendar::kst_offset_hours(date));

    match MarketCalendar::next_settlement_time(now) {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => println!("다음 정산 시각을 찾지 못했습니다."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "trader_scheduler={},trader_exchange={},trader_strategy={}",
                    cli.log_level, cli.log_level, cli.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SchedulerConfig::from_env();
    tracing::debug!(
        auto_buy = config.trading.auto_buy_enabled,
        auto_sell = config.trading.auto_sell_enabled,
        account_concurrency = config.trading.account_concurrency,
        "설정 로드 완료"
    );

    match cli.command {
        Commands::Calendar { date } => print_calendar(date)?,
        Commands::Daemon => {
            tracing::info!("자동매매 스케줄러 시작");
            let engine = Arc::new(build_engine(config).await?);
            let mut scheduler = cron::start(engine).await?;

            tokio::signal::ctrl_c().await.ok();
            tracing::info!("종료 신호 수신, 스케줄러 종료 중...");
            scheduler.shutdown().await.map_err(SchedulerError::from)?;
        }
        Commands::Run { job } => {
            let engine = build_engine(config).await?;
            jobs::run(&engine, job).await?;
        }
        Commands::Diagnose { position } => {
            let engine = build_engine(config).await?;
            let results = jobs::diagnostics::diagnose(&engine, position, Utc::now()).await?;
            if results.is_empty() {
                println!("진단할 포지션이 없습니다.");
            }
            for diagnosis in results {
                let mark = if diagnosis.can_buy { "매수 가능" } else { "매수 불가" };
                println!(
                    "{} {} [{}] {}",
                    diagnosis.position_id, diagnosis.ticker, diagnosis.strategy, mark
                );
                for check in &diagnosis.checks {
                    println!(
                        "  {} {:<22} {}",
                        if check.passed { "✓" } else { "✗" },
                        check.name,
                        check.detail
                    );
                }
            }
        }
        Commands::Logs {
            job,
            status,
            position,
            limit,
        } => {
            let engine = build_engine(config).await?;
            let query = LogQuery {
                job_type: job,
                status,
                position_id: position,
                limit: limit.max(1),
                ..Default::default()
            };
            let entries = engine.logs().query(&query).await?;
            for entry in entries {
                println!(
                    "{} {:<11} {:<9} {} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.job_type.as_str(),
                    entry.status.as_str(),
                    entry
                        .position_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    entry.message
                );
            }
        }
    }

    Ok(())
}
