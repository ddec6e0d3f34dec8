//! 환경변수 기반 설정 모듈.

use std::time::Duration;

/// 스케줄러 전체 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 데이터베이스 URL (없으면 메모리 저장소)
    pub database_url: Option<String>,
    /// 자동매매 설정
    pub trading: TradingConfig,
    /// 증권사 API 설정
    pub broker: BrokerConfig,
    /// cron 트리거 (KST, 6필드)
    pub cron: CronConfig,
    /// 실행 로그 보존 기간 (일)
    pub log_retention_days: i64,
    /// 알림 웹훅 URL
    pub notify_webhook_url: Option<String>,
}

/// 자동매매 설정
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// 자동 매수 활성화
    pub auto_buy_enabled: bool,
    /// 자동 매도(익절) 활성화
    pub auto_sell_enabled: bool,
    /// 현재가 점검 주기 (분)
    pub price_check_interval_minutes: u32,
    /// 포지션 간 호출 간격 (밀리초)
    pub position_delay_ms: u64,
    /// 사용자별 토큰 발급 쿨다운 (초)
    /// KIS 토큰 발급은 1분에 1회로 제한됩니다.
    pub token_cooldown_secs: u64,
    /// 동시에 처리할 계좌 그룹 수 (1이면 순차)
    pub account_concurrency: usize,
}

/// 증권사 API 설정
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// 인증 정보별 최소 호출 간격 (밀리초). 없으면 실전 100ms / 모의 500ms
    pub min_call_interval_ms: Option<u64>,
    /// 시세 캐시 TTL (초)
    pub price_cache_ttl_secs: u64,
    /// 보조 호출(종가 조회 등) 타임아웃 (초)
    pub aux_timeout_secs: u64,
}

/// cron 표현식 (초 분 시 일 월 요일)
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// 기본 전략 매수 (정규장일, 미국 정규장 마감 전)
    pub basic_buy: String,
    /// 기본 전략 매수 (조기폐장일, 13:00 ET 마감 전)
    pub basic_buy_early: String,
    /// LOC 분할 매수 (정규장일)
    pub loc_buy: String,
    /// LOC 분할 매수 (조기폐장일)
    pub loc_buy_early: String,
    /// 현재가 점검 / 자동 익절
    pub price_check: String,
    /// 장중 체결 대사
    pub reconcile: String,
    /// 장 마감 후 LOC 체결 대사
    pub reconcile_close: String,
    /// 조기폐장일 장 마감 후 체결 대사
    pub reconcile_early: String,
    /// 실행 로그 정리
    pub log_prune: String,
}

impl SchedulerConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let price_check_interval_minutes: u32 = env_var_parse("PRICE_CHECK_INTERVAL_MINUTES", 5);

        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            trading: TradingConfig {
                auto_buy_enabled: env_var_bool("AUTO_BUY_ENABLED", true),
                auto_sell_enabled: env_var_bool("AUTO_SELL_ENABLED", true),
                price_check_interval_minutes,
                position_delay_ms: env_var_parse("POSITION_DELAY_MS", 1000),
                token_cooldown_secs: env_var_parse("TOKEN_COOLDOWN_SECS", 65),
                account_concurrency: env_var_parse("ACCOUNT_CONCURRENCY", 1usize).max(1),
            },
            broker: BrokerConfig {
                min_call_interval_ms: std::env::var("KIS_MIN_CALL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                price_cache_ttl_secs: env_var_parse("PRICE_CACHE_TTL_SECS", 5),
                aux_timeout_secs: env_var_parse("AUX_TIMEOUT_SECS", 5),
            },
            cron: CronConfig {
                basic_buy: env_var_or("CRON_BASIC_BUY", "0 30 4 * * Tue-Sat"),
                basic_buy_early: env_var_or("CRON_BASIC_BUY_EARLY", "0 0 1 * * Tue-Sat"),
                loc_buy: env_var_or("CRON_LOC_BUY", "0 0 4 * * Tue-Sat"),
                loc_buy_early: env_var_or("CRON_LOC_BUY_EARLY", "0 30 1 * * Tue-Sat"),
                price_check: env_var_or(
                    "CRON_PRICE_CHECK",
                    &format!("0 */{} * * * *", price_check_interval_minutes.max(1)),
                ),
                reconcile: env_var_or("CRON_RECONCILE", "0 */30 * * * *"),
                reconcile_close: env_var_or("CRON_RECONCILE_CLOSE", "0 30 6 * * Tue-Sat"),
                reconcile_early: env_var_or("CRON_RECONCILE_EARLY", "0 30 3 * * Tue-Sat"),
                log_prune: env_var_or("CRON_LOG_PRUNE", "0 0 12 * * *"),
            },
            log_retention_days: env_var_parse("LOG_RETENTION_DAYS", 30),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

impl Default for SchedulerConfig {
    /// 환경변수 없이 쓰는 기본값 (테스트/드라이런).
    fn default() -> Self {
        Self {
            database_url: None,
            trading: TradingConfig::default(),
            broker: BrokerConfig {
                min_call_interval_ms: None,
                price_cache_ttl_secs: 5,
                aux_timeout_secs: 5,
            },
            cron: CronConfig {
                basic_buy: "0 30 4 * * Tue-Sat".to_string(),
                basic_buy_early: "0 0 1 * * Tue-Sat".to_string(),
                loc_buy: "0 0 4 * * Tue-Sat".to_string(),
                loc_buy_early: "0 30 1 * * Tue-Sat".to_string(),
                price_check: "0 */5 * * * *".to_string(),
                reconcile: "0 */30 * * * *".to_string(),
                reconcile_close: "0 30 6 * * Tue-Sat".to_string(),
                reconcile_early: "0 30 3 * * Tue-Sat".to_string(),
                log_prune: "0 0 12 * * *".to_string(),
            },
            log_retention_days: 30,
            notify_webhook_url: None,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            auto_buy_enabled: true,
            auto_sell_enabled: true,
            price_check_interval_minutes: 5,
            position_delay_ms: 1000,
            token_cooldown_secs: 65,
            account_concurrency: 1,
        }
    }
}

impl TradingConfig {
    /// 포지션 간 호출 간격을 Duration으로 반환
    pub fn position_delay(&self) -> Duration {
        Duration::from_millis(self.position_delay_ms)
    }

    /// 토큰 발급 쿨다운을 Duration으로 반환
    pub fn token_cooldown(&self) -> Duration {
        Duration::from_secs(self.token_cooldown_secs)
    }
}

impl BrokerConfig {
    pub fn min_call_interval(&self) -> Option<Duration> {
        self.min_call_interval_ms.map(Duration::from_millis)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }

    pub fn aux_timeout(&self) -> Duration {
        Duration::from_secs(self.aux_timeout_secs)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// 환경변수 문자열 (비어 있으면 기본값)
fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
