//! PostgreSQL 저장소 (sqlx).
//!
//! 모든 조회는 `query_as` + `FromRow` 행 타입으로 읽고, 도메인 타입으로 변환합니다.
//! 인증 정보는 외부 서비스가 복호화해 둔 `kis_credentials_view`에서 읽기만 하며,
//! 재발급된 접근 토큰만 되돌려 씁니다.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use trader_core::{
    BuyCondition, Credential, ExchangeCode, ExecutionLog, JobType, LogStatus, OrderKind,
    OrderRecord, OrderSide, OrderStatus, OrderSubType, Position, PositionStatus, StrategyKind,
    VrParams,
};
use uuid::Uuid;

use super::{
    CredentialStore, ExecutionLogSink, LogQuery, OrderFilter, PositionFilter, PositionStore,
};
use crate::error::StoreError;

// ================================================================================================
// Rows
// ================================================================================================

#[derive(Debug, FromRow)]
struct PositionRow {
    id: Uuid,
    user_id: Uuid,
    ticker: String,
    exchange: String,
    strategy: String,
    status: String,
    auto_enabled: bool,
    current_round: i32,
    total_rounds: i32,
    buy_amount: Decimal,
    total_invested: Decimal,
    total_quantity: i64,
    avg_price: Decimal,
    target_profit_pct: Decimal,
    buy_condition: String,
    vr_params: Option<Json<VrParams>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    position_id: Uuid,
    side: String,
    round: Option<i32>,
    price: Decimal,
    quantity: i64,
    amount: Decimal,
    kind: String,
    order_id: Option<String>,
    status: String,
    sub_type: Option<String>,
    optimistic: bool,
    created_at: DateTime<Utc>,
    filled_at: Option<DateTime<Utc>>,
    profit: Option<Decimal>,
    note: Option<String>,
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    user_id: Uuid,
    app_key: String,
    app_secret: String,
    account_no: String,
    is_paper: bool,
    access_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct LogRow {
    id: Uuid,
    job_type: String,
    status: String,
    message: String,
    position_id: Option<Uuid>,
    details: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

fn parse<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Decode(e.to_string()))
}

fn to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("{} 음수: {}", column, value)))
}

impl TryFrom<PositionRow> for Position {
    type Error = StoreError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(Position {
            id: row.id,
            user_id: row.user_id,
            ticker: row.ticker,
            exchange: parse::<ExchangeCode>(&row.exchange)?,
            strategy: parse::<StrategyKind>(&row.strategy)?,
            status: parse::<PositionStatus>(&row.status)?,
            auto_enabled: row.auto_enabled,
            current_round: to_u32(row.current_round, "current_round")?,
            total_rounds: to_u32(row.total_rounds, "total_rounds")?,
            buy_amount: row.buy_amount,
            total_invested: row.total_invested,
            total_quantity: row.total_quantity,
            avg_price: row.avg_price,
            target_profit_pct: row.target_profit_pct,
            buy_condition: parse::<BuyCondition>(&row.buy_condition)?,
            vr: row.vr_params.map(|json| json.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(OrderRecord {
            id: row.id,
            position_id: row.position_id,
            side: parse::<OrderSide>(&row.side)?,
            round: row.round.map(|r| to_u32(r, "round")).transpose()?,
            price: row.price,
            quantity: row.quantity,
            amount: row.amount,
            kind: parse::<OrderKind>(&row.kind)?,
            order_id: row.order_id,
            status: parse::<OrderStatus>(&row.status)?,
            sub_type: row
                .sub_type
                .as_deref()
                .map(parse::<OrderSubType>)
                .transpose()?,
            optimistic: row.optimistic,
            created_at: row.created_at,
            filled_at: row.filled_at,
            profit: row.profit,
            note: row.note,
        })
    }
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        let credential = Credential::new(
            row.user_id,
            row.app_key,
            row.app_secret,
            row.account_no,
            row.is_paper,
        );
        match (row.access_token, row.token_expires_at) {
            (Some(token), Some(expires_at)) => credential.with_token(token, expires_at),
            _ => credential,
        }
    }
}

impl TryFrom<LogRow> for ExecutionLog {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(ExecutionLog {
            id: row.id,
            job_type: parse::<JobType>(&row.job_type)?,
            status: parse::<LogStatus>(&row.status)?,
            message: row.message,
            position_id: row.position_id,
            details: row.details,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

// ================================================================================================
// Store
// ================================================================================================

const POSITION_UPSERT: &str = r#"
    INSERT INTO positions (
        id, user_id, ticker, exchange, strategy, status, auto_enabled,
        current_round, total_rounds, buy_amount, total_invested, total_quantity,
        avg_price, target_profit_pct, buy_condition, vr_params, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
    ON CONFLICT (id) DO UPDATE SET
        status = EXCLUDED.status,
        auto_enabled = EXCLUDED.auto_enabled,
        current_round = EXCLUDED.current_round,
        total_rounds = EXCLUDED.total_rounds,
        buy_amount = EXCLUDED.buy_amount,
        total_invested = EXCLUDED.total_invested,
        total_quantity = EXCLUDED.total_quantity,
        avg_price = EXCLUDED.avg_price,
        target_profit_pct = EXCLUDED.target_profit_pct,
        buy_condition = EXCLUDED.buy_condition,
        vr_params = EXCLUDED.vr_params,
        updated_at = EXCLUDED.updated_at
"#;

const ORDER_INSERT: &str = r#"
    INSERT INTO order_records (
        id, position_id, side, round, price, quantity, amount, kind, order_id,
        status, sub_type, optimistic, created_at, filled_at, profit, note
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

const ORDER_UPDATE: &str = r#"
    UPDATE order_records
    SET price = $2, quantity = $3, amount = $4, status = $5,
        filled_at = $6, profit = $7, note = $8
    WHERE id = $1
"#;

/// PostgreSQL 저장소.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 데이터베이스 연결
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("데이터베이스 연결 완료");
        Ok(Self::new(pool))
    }

    /// 스키마 마이그레이션 실행
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_position_tx(
        tx: &mut Transaction<'_, Postgres>,
        position: &Position,
    ) -> Result<(), StoreError> {
        sqlx::query(POSITION_UPSERT)
            .bind(position.id)
            .bind(position.user_id)
            .bind(&position.ticker)
            .bind(position.exchange.as_str())
            .bind(position.strategy.as_str())
            .bind(position.status.as_str())
            .bind(position.auto_enabled)
            .bind(position.current_round as i32)
            .bind(position.total_rounds as i32)
            .bind(position.buy_amount)
            .bind(position.total_invested)
            .bind(position.total_quantity)
            .bind(position.avg_price)
            .bind(position.target_profit_pct)
            .bind(position.buy_condition.as_str())
            .bind(position.vr.as_ref().map(Json))
            .bind(position.created_at)
            .bind(position.updated_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_order_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &OrderRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(ORDER_INSERT)
            .bind(record.id)
            .bind(record.position_id)
            .bind(record.side.as_str())
            .bind(record.round.map(|r| r as i32))
            .bind(record.price)
            .bind(record.quantity)
            .bind(record.amount)
            .bind(record.kind.as_str())
            .bind(&record.order_id)
            .bind(record.status.as_str())
            .bind(record.sub_type.map(|s| s.as_str()))
            .bind(record.optimistic)
            .bind(record.created_at)
            .bind(record.filled_at)
            .bind(record.profit)
            .bind(&record.note)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn update_order_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &OrderRecord,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(ORDER_UPDATE)
            .bind(record.id)
            .bind(record.price)
            .bind(record.quantity)
            .bind(record.amount)
            .bind(record.status.as_str())
            .bind(record.filled_at)
            .bind(record.profit)
            .bind(&record.note)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "주문 기록",
                id: record.id,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for PgStore {
    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Position::try_from)
            .transpose()
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_position_tx(&mut tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_positions(&self, filter: &PositionFilter) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT * FROM positions
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::boolean IS NULL OR auto_enabled = $2)
              AND ($3::varchar IS NULL OR strategy = $3)
            ORDER BY created_at
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.auto_enabled)
        .bind(filter.strategy.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "포지션 조회");
        rows.into_iter().map(Position::try_from).collect()
    }

    async fn create_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_order_tx(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::update_order_tx(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT * FROM order_records
            WHERE ($1::uuid IS NULL OR position_id = $1)
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::varchar IS NULL OR side = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
            ORDER BY created_at
            "#,
        )
        .bind(filter.position_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.side.map(|s| s.as_str()))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderRecord::try_from).collect()
    }

    async fn save_position_with_orders(
        &self,
        position: &Position,
        orders: &[OrderRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_position_tx(&mut tx, position).await?;
        for record in orders {
            Self::insert_order_tx(&mut tx, record).await?;
        }
        tx.commit().await?;

        debug!(
            position_id = %position.id,
            orders = orders.len(),
            "포지션 + 주문 기록 저장"
        );
        Ok(())
    }

    async fn settle_order(
        &self,
        record: &OrderRecord,
        position: Option<&Position>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::update_order_tx(&mut tx, record).await?;
        if let Some(position) = position {
            Self::upsert_position_tx(&mut tx, position).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT user_id, app_key, app_secret, account_no, is_paper,
                   access_token, token_expires_at
            FROM kis_credentials_view
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Credential::from))
    }

    async fn update_token(
        &self,
        user_id: Uuid,
        access_token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE kis_credentials
            SET access_token = $2, token_expires_at = $3, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(access_token.expose_secret())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "인증 정보",
                id: user_id,
            });
        }
        debug!(user_id = %user_id, expires_at = %expires_at, "접근 토큰 저장");
        Ok(())
    }
}

#[async_trait]
impl ExecutionLogSink for PgStore {
    async fn append(&self, entry: &ExecutionLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                id, job_type, status, message, position_id, details, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_type.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(entry.position_id)
        .bind(&entry.details)
        .bind(&entry.error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLog>, StoreError> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT * FROM execution_logs
            WHERE ($1::varchar IS NULL OR job_type = $1)
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR position_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(query.job_type.map(|j| j.as_str()))
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.position_id)
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutionLog::try_from).collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
