//! 메모리 저장소.
//!
//! 하나의 락으로 모든 테이블을 보호하므로 다중 쓰기는 자연히 원자적입니다.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;
use trader_core::{Credential, ExecutionLog, OrderRecord, Position};
use uuid::Uuid;

use super::{
    CredentialStore, ExecutionLogSink, LogQuery, OrderFilter, PositionFilter, PositionStore,
};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    positions: HashMap<Uuid, Position>,
    /// 삽입 순서 유지
    orders: Vec<OrderRecord>,
    credentials: HashMap<Uuid, Credential>,
    logs: Vec<ExecutionLog>,
}

/// 메모리 저장소.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 인증 정보 등록.
    pub async fn insert_credential(&self, credential: Credential) {
        self.tables
            .write()
            .await
            .credentials
            .insert(credential.user_id, credential);
    }

    /// 전체 주문 기록 (삽입 순).
    pub async fn orders(&self) -> Vec<OrderRecord> {
        self.tables.read().await.orders.clone()
    }

    /// 전체 실행 로그 (삽입 순).
    pub async fn logs(&self) -> Vec<ExecutionLog> {
        self.tables.read().await.logs.clone()
    }

    /// 저장된 토큰 만료 시각.
    pub async fn token_expiry(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.tables
            .read()
            .await
            .credentials
            .get(&user_id)
            .and_then(|c| c.token_expires_at)
    }
}

fn replace_order(orders: &mut [OrderRecord], record: &OrderRecord) -> Result<(), StoreError> {
    let slot = orders
        .iter_mut()
        .find(|o| o.id == record.id)
        .ok_or(StoreError::NotFound {
            kind: "주문 기록",
            id: record.id,
        })?;
    *slot = record.clone();
    Ok(())
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        Ok(self.tables.read().await.positions.get(&id).cloned())
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .positions
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn list_positions(&self, filter: &PositionFilter) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read().await;
        let mut positions: Vec<Position> = tables
            .positions
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.created_at);
        Ok(positions)
    }

    async fn create_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        self.tables.write().await.orders.push(record.clone());
        Ok(())
    }

    async fn update_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        replace_order(&mut self.tables.write().await.orders, record)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<OrderRecord> = tables
            .orders
            .iter()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn save_position_with_orders(
        &self,
        position: &Position,
        orders: &[OrderRecord],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.positions.insert(position.id, position.clone());
        tables.orders.extend_from_slice(orders);
        Ok(())
    }

    async fn settle_order(
        &self,
        record: &OrderRecord,
        position: Option<&Position>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        replace_order(&mut tables.orders, record)?;
        if let Some(position) = position {
            tables.positions.insert(position.id, position.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError> {
        Ok(self.tables.read().await.credentials.get(&user_id).cloned())
    }

    async fn update_token(
        &self,
        user_id: Uuid,
        access_token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let credential = tables
            .credentials
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound {
                kind: "인증 정보",
                id: user_id,
            })?;
        credential.access_token = Some(access_token.clone());
        credential.token_expires_at = Some(expires_at);
        Ok(())
    }
}

#[async_trait]
impl ExecutionLogSink for MemoryStore {
    async fn append(&self, entry: &ExecutionLog) -> Result<(), StoreError> {
        self.tables.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLog>, StoreError> {
        let tables = self.tables.read().await;
        let mut entries: Vec<ExecutionLog> = tables
            .logs
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.logs.len();
        tables.logs.retain(|e| e.created_at >= cutoff);
        Ok((before - tables.logs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use trader_core::{
        ExchangeCode, JobType, LogStatus, OrderKind, OrderSide, OrderStatus, StrategyKind,
    };

    use super::*;

    fn position() -> Position {
        Position::new(
            Uuid::new_v4(),
            "TQQQ",
            ExchangeCode::Nasd,
            StrategyKind::Basic,
            dec!(100),
            10,
        )
    }

    #[tokio::test]
    async fn settle_updates_record_and_position_together() {
        let store = MemoryStore::new();
        let mut p = position();
        let record = OrderRecord::pending(p.id, OrderSide::Buy, OrderKind::Limit, dec!(10), 5);
        store
            .save_position_with_orders(&p, std::slice::from_ref(&record))
            .await
            .unwrap();

        let mut filled = record.clone();
        filled.mark_filled(dec!(9.5), 5, Utc::now()).unwrap();
        p.add_holdings(5, dec!(47.5));
        store.settle_order(&filled, Some(&p)).await.unwrap();

        let pending = store.list_orders(&OrderFilter::pending()).await.unwrap();
        assert!(pending.is_empty());
        let saved = store.get_position(p.id).await.unwrap().unwrap();
        assert_eq!(saved.total_quantity, 5);
        assert_eq!(store.orders().await[0].status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn unknown_order_update_fails() {
        let store = MemoryStore::new();
        let record =
            OrderRecord::pending(Uuid::new_v4(), OrderSide::Sell, OrderKind::Loc, dec!(1), 1);
        assert!(matches!(
            store.update_order(&record).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn prune_removes_only_old_logs() {
        let store = MemoryStore::new();
        let mut old = ExecutionLog::new(JobType::Reconcile, LogStatus::Completed, "old");
        old.created_at = Utc::now() - Duration::days(40);
        store.append(&old).await.unwrap();
        store
            .append(&ExecutionLog::new(JobType::Reconcile, LogStatus::Completed, "new"))
            .await
            .unwrap();

        let removed = store
            .prune_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let left = store.query(&LogQuery::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "new");
    }
}
