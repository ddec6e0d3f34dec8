//! KIS 해외주식 REST 클라이언트.
//!
//! # 아키텍처
//!
//! ```text
//! KisBrokerFactory (프로세스 공유)
//! ├── KeyedRateLimiter (실전/모의 각각, 인증 정보 키)
//! ├── 시세 캐시 TtlMap<(ticker, exchange), Quote>
//! └── connect(credential) ──▶ KisOverseasClient (인증 정보 1개)
//!                              ├── KisOAuth (토큰, hashkey, 재발급 콜백)
//!                              ├── 시세: get_price, get_daily_close
//!                              ├── 주문: place_order (hashkey 서명)
//!                              └── 조회: get_filled_orders, get_pending_orders
//! ```
//!
//! 모든 호출은 `with_auth_retry`로 감싸 토큰 만료 시 1회 재발급/재시도하고,
//! 멱등한 시세 조회는 추가로 `with_retry` 백오프를 적용합니다.

use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use reqwest::{Client, RequestBuilder};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use trader_core::{Credential, ExchangeCode, OrderKind, OrderSide, TtlMap};

use crate::{
    broker::{
        BrokerFactory, FilledOrder, OrderRequest, OverseasBroker, PendingOrder, PlacedOrder, Quote,
    },
    config::{KisConfig, KisEnvironment},
    oauth::{KisOAuth, TokenRefreshHook},
    rate_limit::KeyedRateLimiter,
    retry::{with_auth_retry, with_retry, RetryConfig},
    tr_id, ExchangeError,
};

/// 연속 조회 최대 페이지 수
const MAX_PAGES: usize = 10;
/// 주문 구분: 지정가
const ORD_DVSN_LIMIT: &str = "00";
/// 주문 구분: 장마감 지정가 (LOC)
const ORD_DVSN_LOC: &str = "34";

/// 시세 캐시 키.
pub type PriceCache = TtlMap<(String, ExchangeCode), Quote>;

/// 인증 정보 하나에 묶인 KIS 해외주식 클라이언트.
pub struct KisOverseasClient {
    oauth: Arc<KisOAuth>,
    http: Client,
    limiter: Arc<KeyedRateLimiter>,
    price_cache: Arc<PriceCache>,
    retry: RetryConfig,
    aux_timeout: Duration,
}

impl KisOverseasClient {
    pub fn new(
        oauth: Arc<KisOAuth>,
        http: Client,
        limiter: Arc<KeyedRateLimiter>,
        price_cache: Arc<PriceCache>,
    ) -> Self {
        Self {
            oauth,
            http,
            limiter,
            price_cache,
            retry: RetryConfig::fast(),
            aux_timeout: Duration::from_secs(5),
        }
    }

    /// 시세 조회 재시도 설정.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 보조 조회(종가) 타임아웃.
    pub fn with_aux_timeout(mut self, timeout: Duration) -> Self {
        self.aux_timeout = timeout;
        self
    }

    pub fn oauth(&self) -> &Arc<KisOAuth> {
        &self.oauth
    }

    fn config(&self) -> &KisConfig {
        self.oauth.config()
    }

    async fn refresh_token(&self) -> Result<(), ExchangeError> {
        self.oauth.reissue().await.map(|_| ())
    }

    /// 인증 헤더 부착.
    fn authed(&self, builder: RequestBuilder, token: &str, tr_id: &str, tr_cont: &str) -> RequestBuilder {
        let config = self.config();
        let builder = builder
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token))
            .header("appkey", &config.app_key)
            .header("appsecret", config.app_secret())
            .header("tr_id", tr_id)
            .header("custtype", "P");
        if tr_cont.is_empty() {
            builder
        } else {
            builder.header("tr_cont", tr_cont)
        }
    }

    /// 요청 전송 후 `rt_cd` 검사. 응답 본문과 연속 조회 헤더를 반환.
    async fn send(
        &self,
        builder: RequestBuilder,
        is_order: bool,
    ) -> Result<(Value, String), ExchangeError> {
        self.limiter.acquire(&self.config().identity).await;

        let response = builder.send().await?;
        let status = response.status();
        let tr_cont = response
            .headers()
            .get("tr_cont")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response.text().await?;

        let payload: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if status.as_u16() == 401 => {
                return Err(ExchangeError::AuthExpired(format!("HTTP {}", status)))
            }
            Err(_) if !status.is_success() => {
                return Err(ExchangeError::NetworkError(format!("HTTP {}: {}", status, text)))
            }
            Err(e) => return Err(ExchangeError::ParseError(e.to_string())),
        };

        let rt_cd = payload["rt_cd"].as_str().unwrap_or_default();
        let msg_cd = payload["msg_cd"].as_str().unwrap_or_default();
        let msg = payload["msg1"].as_str().unwrap_or_default().trim();

        if status.as_u16() == 401 {
            return Err(ExchangeError::AuthExpired(msg.to_string()));
        }
        if rt_cd != "0" || !status.is_success() {
            if msg_cd.is_empty() && status.is_server_error() {
                return Err(ExchangeError::NetworkError(format!("HTTP {}", status)));
            }
            return Err(ExchangeError::from_kis(msg_cd, msg, is_order));
        }

        Ok((payload, tr_cont))
    }

    async fn fetch_price(&self, ticker: &str, exchange: ExchangeCode) -> Result<Quote, ExchangeError> {
        let token = self.oauth.access_token().await?;
        let request = self
            .http
            .get(self.config().url("/uapi/overseas-price/v1/quotations/price"))
            .query(&[("AUTH", ""), ("EXCD", exchange.quote_code()), ("SYMB", ticker)]);
        let (payload, _) = self
            .send(self.authed(request, &token, tr_id::PRICE, ""), false)
            .await?;

        let output = &payload["output"];
        let previous_close = decimal_field(output, "base");
        let mut price = decimal_field(output, "last");
        if price.is_zero() {
            // 체결이 없는 종목은 last가 비어 있음
            price = previous_close;
        }
        if price.is_zero() {
            return Err(ExchangeError::ParseError(format!("{} 현재가 없음", ticker)));
        }

        Ok(Quote {
            ticker: ticker.to_string(),
            exchange,
            price,
            previous_close,
            fetched_at: Utc::now(),
        })
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let config = self.config();
        let sell_type = if request.side == OrderSide::Sell { "00" } else { "" };
        let ord_dvsn = match request.kind {
            OrderKind::Limit => ORD_DVSN_LIMIT,
            OrderKind::Loc => ORD_DVSN_LOC,
        };
        let body = json!({
            "CANO": config.account_prefix,
            "ACNT_PRDT_CD": config.account_suffix,
            "OVRS_EXCG_CD": request.exchange.order_code(),
            "PDNO": request.ticker,
            "ORD_QTY": request.quantity.to_string(),
            "OVRS_ORD_UNPR": request.price.round_dp(2).to_string(),
            "CTAC_TLNO": "",
            "MGCO_APTM_ODNO": "",
            "SLL_TYPE": sell_type,
            "ORD_SVR_DVSN_CD": "0",
            "ORD_DVSN": ord_dvsn,
        });

        let token = self.oauth.access_token().await?;
        self.limiter.acquire(&config.identity).await;
        let hash = self.oauth.hashkey(&body).await?;

        let builder = self
            .http
            .post(config.url("/uapi/overseas-stock/v1/trading/order"))
            .header("hashkey", hash)
            .json(&body);
        let tr = tr_id::order(config.environment, request.side);
        let (payload, _) = self.send(self.authed(builder, &token, tr, ""), true).await?;

        let order_id = str_field(&payload["output"], "ODNO");
        if order_id.is_empty() {
            return Err(ExchangeError::ParseError("주문 응답에 ODNO 없음".to_string()));
        }

        Ok(PlacedOrder {
            order_id,
            accepted_at: Utc::now(),
        })
    }

    async fn fetch_filled(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FilledOrder>, ExchangeError> {
        let config = self.config();
        let tr = tr_id::filled_orders(config.environment);
        let start = start.format("%Y%m%d").to_string();
        let end = end.format("%Y%m%d").to_string();

        let mut fills = Vec::new();
        let mut ctx = (String::new(), String::new());
        let mut tr_cont = String::new();

        for _ in 0..MAX_PAGES {
            let token = self.oauth.access_token().await?;
            let request = self
                .http
                .get(config.url("/uapi/overseas-stock/v1/trading/inquire-ccnl"))
                .query(&[
                    ("CANO", config.account_prefix.as_str()),
                    ("ACNT_PRDT_CD", config.account_suffix.as_str()),
                    ("PDNO", "%"),
                    ("ORD_STRT_DT", start.as_str()),
                    ("ORD_END_DT", end.as_str()),
                    ("SLL_BUY_DVSN", "00"),
                    ("CCLD_NCCS_DVSN", "01"),
                    ("OVRS_EXCG_CD", "%"),
                    ("SORT_SQN", "DS"),
                    ("ORD_DT", ""),
                    ("ORD_GNO_BRNO", ""),
                    ("ODNO", ""),
                    ("CTX_AREA_FK200", ctx.0.as_str()),
                    ("CTX_AREA_NK200", ctx.1.as_str()),
                ]);
            let (payload, next) = self
                .send(self.authed(request, &token, tr, &tr_cont), false)
                .await?;

            fills.extend(rows(&payload["output"]).filter_map(parse_fill));

            if !has_more(&next) {
                break;
            }
            ctx = continuation(&payload);
            tr_cont = "N".to_string();
        }

        debug!(count = fills.len(), %start, %end, "체결 내역 조회");
        Ok(fills)
    }

    async fn fetch_pending(&self, exchange: ExchangeCode) -> Result<Vec<PendingOrder>, ExchangeError> {
        let config = self.config();
        let tr = tr_id::pending_orders(config.environment);

        let mut pending = Vec::new();
        let mut ctx = (String::new(), String::new());
        let mut tr_cont = String::new();

        for _ in 0..MAX_PAGES {
            let token = self.oauth.access_token().await?;
            let request = self
                .http
                .get(config.url("/uapi/overseas-stock/v1/trading/inquire-nccs"))
                .query(&[
                    ("CANO", config.account_prefix.as_str()),
                    ("ACNT_PRDT_CD", config.account_suffix.as_str()),
                    ("OVRS_EXCG_CD", exchange.order_code()),
                    ("SORT_SQN", "DS"),
                    ("CTX_AREA_FK200", ctx.0.as_str()),
                    ("CTX_AREA_NK200", ctx.1.as_str()),
                ]);
            let (payload, next) = self
                .send(self.authed(request, &token, tr, &tr_cont), false)
                .await?;

            pending.extend(rows(&payload["output"]).filter_map(parse_pending));

            if !has_more(&next) {
                break;
            }
            ctx = continuation(&payload);
            tr_cont = "N".to_string();
        }

        Ok(pending)
    }

    async fn fetch_daily_close(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, ExchangeError> {
        let token = self.oauth.access_token().await?;
        let ymd = date.format("%Y%m%d").to_string();
        let request = self
            .http
            .get(self.config().url("/uapi/overseas-price/v1/quotations/dailyprice"))
            .timeout(self.aux_timeout)
            .query(&[
                ("AUTH", ""),
                ("EXCD", exchange.quote_code()),
                ("SYMB", ticker),
                ("GUBN", "0"),
                ("BYMD", ymd.as_str()),
                ("MODP", "0"),
            ]);
        let (payload, _) = self
            .send(self.authed(request, &token, tr_id::DAILY_PRICE, ""), false)
            .await?;

        let close = rows(&payload["output2"])
            .find(|row| str_field(row, "xymd") == ymd)
            .map(|row| decimal_field(row, "clos"))
            .filter(|close| !close.is_zero());
        Ok(close)
    }
}

#[async_trait]
impl OverseasBroker for KisOverseasClient {
    async fn is_token_valid(&self) -> bool {
        self.oauth.is_token_valid().await
    }

    async fn ensure_token(&self) -> Result<(), ExchangeError> {
        self.oauth.access_token().await.map(|_| ())
    }

    async fn get_price(&self, ticker: &str, exchange: ExchangeCode) -> Result<Quote, ExchangeError> {
        let key = (ticker.to_string(), exchange);
        if let Some(quote) = self.price_cache.get(&key).await {
            return Ok(quote);
        }

        let quote = with_auth_retry(
            || with_retry(&self.retry, || self.fetch_price(ticker, exchange)),
            || self.refresh_token(),
        )
        .await?;

        self.price_cache.set(key, quote.clone()).await;
        Ok(quote)
    }

    async fn peek_price(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
    ) -> Result<Quote, ExchangeError> {
        let key = (ticker.to_string(), exchange);
        if let Some(quote) = self.price_cache.get(&key).await {
            return Ok(quote);
        }
        if !self.oauth.is_token_valid().await {
            return Err(ExchangeError::AuthExpired("유효한 토큰 없음".to_string()));
        }
        self.fetch_price(ticker, exchange).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        if request.quantity < 1 {
            return Err(ExchangeError::OrderRejected {
                code: "QTY".to_string(),
                message: format!("주문 수량 {}", request.quantity),
            });
        }

        let placed = with_auth_retry(|| self.submit_order(request), || self.refresh_token()).await?;

        info!(
            ticker = %request.ticker,
            side = %request.side,
            kind = %request.kind,
            price = %request.price,
            quantity = request.quantity,
            order_id = %placed.order_id,
            "주문 접수"
        );
        Ok(placed)
    }

    async fn get_filled_orders(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FilledOrder>, ExchangeError> {
        with_auth_retry(
            || with_retry(&self.retry, || self.fetch_filled(start, end)),
            || self.refresh_token(),
        )
        .await
    }

    async fn get_pending_orders(
        &self,
        exchange: ExchangeCode,
    ) -> Result<Vec<PendingOrder>, ExchangeError> {
        with_auth_retry(
            || with_retry(&self.retry, || self.fetch_pending(exchange)),
            || self.refresh_token(),
        )
        .await
    }

    async fn get_daily_close(
        &self,
        ticker: &str,
        exchange: ExchangeCode,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, ExchangeError> {
        with_auth_retry(
            || self.fetch_daily_close(ticker, exchange, date),
            || self.refresh_token(),
        )
        .await
    }
}

/// KIS 브로커 팩토리.
pub struct KisBrokerFactory {
    http: Client,
    live_limiter: Arc<KeyedRateLimiter>,
    paper_limiter: Arc<KeyedRateLimiter>,
    price_cache: Arc<PriceCache>,
    hook: Option<Arc<dyn TokenRefreshHook>>,
    base_url: Option<String>,
    aux_timeout: Duration,
}

impl KisBrokerFactory {
    /// 기본 설정으로 생성 (시세 캐시 TTL 지정).
    pub fn new(price_cache_ttl: Duration) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .build()
            .map_err(|e| ExchangeError::ConfigError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            http,
            live_limiter: Arc::new(KeyedRateLimiter::new(
                KisEnvironment::Real.default_min_interval(),
            )),
            paper_limiter: Arc::new(KeyedRateLimiter::new(
                KisEnvironment::Paper.default_min_interval(),
            )),
            price_cache: Arc::new(PriceCache::new(price_cache_ttl)),
            hook: None,
            base_url: None,
            aux_timeout: Duration::from_secs(5),
        })
    }

    /// 실전/모의 공통 최소 호출 간격 지정.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.live_limiter = Arc::new(KeyedRateLimiter::new(interval));
        self.paper_limiter = Arc::new(KeyedRateLimiter::new(interval));
        self
    }

    /// 토큰 재발급 콜백 지정.
    pub fn with_hook(mut self, hook: Arc<dyn TokenRefreshHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// 기본 URL 교체 (테스트 서버).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_aux_timeout(mut self, timeout: Duration) -> Self {
        self.aux_timeout = timeout;
        self
    }

    pub fn price_cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.price_cache)
    }

    /// 구체 타입으로 클라이언트 생성.
    pub fn client(&self, credential: &Credential) -> KisOverseasClient {
        let mut config = KisConfig::from_credential(credential);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        let limiter = if config.environment.is_paper() {
            Arc::clone(&self.paper_limiter)
        } else {
            Arc::clone(&self.live_limiter)
        };

        let mut oauth = KisOAuth::new(config, credential.user_id, self.http.clone());
        if let (Some(token), Some(expires_at)) =
            (credential.access_token.clone(), credential.token_expires_at)
        {
            oauth = oauth.with_token(token, expires_at);
        }
        if let Some(hook) = &self.hook {
            oauth = oauth.with_hook(Arc::clone(hook));
        }

        KisOverseasClient::new(
            Arc::new(oauth),
            self.http.clone(),
            limiter,
            Arc::clone(&self.price_cache),
        )
        .with_aux_timeout(self.aux_timeout)
    }
}

impl BrokerFactory for KisBrokerFactory {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn OverseasBroker>, ExchangeError> {
        if credential.app_key.is_empty() {
            return Err(ExchangeError::ConfigError("앱키 없음".to_string()));
        }
        if credential.account_prefix().len() != 8 {
            return Err(ExchangeError::ConfigError(format!(
                "계좌번호 형식 오류 (user_id={})",
                credential.user_id
            )));
        }
        Ok(Arc::new(self.client(credential)))
    }
}

// ==================== 응답 파싱 ====================

fn rows(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

fn has_more(tr_cont: &str) -> bool {
    matches!(tr_cont, "M" | "F")
}

fn continuation(payload: &Value) -> (String, String) {
    (
        str_field(payload, "ctx_area_fk200"),
        str_field(payload, "ctx_area_nk200"),
    )
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().trim().to_string()
}

fn decimal_field(value: &Value, key: &str) -> Decimal {
    match &value[key] {
        Value::String(s) => Decimal::from_str(s.trim()).unwrap_or_default(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn int_field(value: &Value, key: &str) -> i64 {
    decimal_field(value, key).trunc().to_i64().unwrap_or(0)
}

fn side_field(value: &Value) -> Option<OrderSide> {
    match value["sll_buy_dvsn_cd"].as_str()? {
        "01" => Some(OrderSide::Sell),
        "02" => Some(OrderSide::Buy),
        _ => None,
    }
}

/// KIS 날짜/시간 (YYYYMMDD + HHMMSS, KST) → UTC.
fn parse_kst(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&format!("{} {:0>6}", date, time), "%Y%m%d %H%M%S").ok()?;
    Seoul
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_fill(row: &Value) -> Option<FilledOrder> {
    let filled_quantity = int_field(row, "ft_ccld_qty");
    let order_id = str_field(row, "odno");
    if order_id.is_empty() {
        return None;
    }
    let Some(side) = side_field(row) else {
        warn!(order_id = %order_id, "체결 내역 매매구분 해석 실패");
        return None;
    };
    let filled_price = decimal_field(row, "ft_ccld_unpr3");
    let mut filled_amount = decimal_field(row, "ft_ccld_amt3");
    if filled_amount.is_zero() {
        filled_amount = filled_price * Decimal::from(filled_quantity);
    }

    Some(FilledOrder {
        order_id,
        ticker: str_field(row, "pdno"),
        side,
        filled_quantity,
        filled_price,
        filled_amount,
        remaining_quantity: int_field(row, "nccs_qty"),
        filled_at: parse_kst(&str_field(row, "ord_dt"), &str_field(row, "ord_tmd"))
            .unwrap_or_else(Utc::now),
    })
}

fn parse_pending(row: &Value) -> Option<PendingOrder> {
    let order_id = str_field(row, "odno");
    if order_id.is_empty() {
        return None;
    }
    Some(PendingOrder {
        order_id,
        ticker: str_field(row, "pdno"),
        side: side_field(row)?,
        order_quantity: int_field(row, "ft_ord_qty"),
        remaining_quantity: int_field(row, "nccs_qty"),
        price: decimal_field(row, "ft_ord_unpr3"),
    })
}
