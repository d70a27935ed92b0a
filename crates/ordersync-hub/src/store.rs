//! 주문 영속 계층.
//!
//! status 쓰기는 모두 조건부 UPDATE입니다: 행의 현재 status가 해당 거래
//! 모드에서 아직 종료 상태가 아닐 때만 갱신됩니다. 스트림 경로와 폴링
//! 경로가 같은 주문에 동시에 쓰더라도 종료 상태는 되돌아가지 않습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use ordersync_core::{
    CanonicalOrderUpdate, ConnectionKey, Exchange, OrderRecord, OrderSide, OrderStatus,
    TradingMode,
};

use crate::HubError;

/// 해당 거래 모드의 종료 상태 컬럼 값 목록.
fn terminal_statuses(mode: TradingMode) -> Vec<String> {
    let statuses: &[&str] = match mode {
        TradingMode::Spot => &["filled", "closed", "failed"],
        TradingMode::Futures => &["closed", "failed"],
    };
    statuses.iter().map(|s| s.to_string()).collect()
}

/// 주문 저장소 seam.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 정합성 점검 후보 로드.
    ///
    /// 선물은 비종료 상태 전부, 현물은 `pending|new|partially_filled`만.
    async fn load_candidates(&self) -> Result<Vec<OrderRecord>, HubError>;

    /// 스트림 업데이트를 해당 주문 행에 반영.
    ///
    /// 거래소 주문번호로 행을 찾고, 상태 머신이 허용하는 경우에만 조건부로
    /// 갱신합니다. 반영된 경우 갱신 후 레코드를 반환하며, 매칭되는 행이
    /// 없거나 전이가 거부되면 `None`입니다.
    async fn apply_stream_update(
        &self,
        key: &ConnectionKey,
        update: &CanonicalOrderUpdate,
    ) -> Result<Option<OrderRecord>, HubError>;

    /// 폴링 경로의 status 전이를 조건부로 반영.
    ///
    /// 행이 실제로 갱신됐을 때만 `true`. 이미 종료 상태면 `false`이며,
    /// 이것이 연속 틱에서의 중복 전이를 막는 exactly-once 장치입니다.
    async fn apply_status(
        &self,
        order: &OrderRecord,
        next: OrderStatus,
        filled_price: Decimal,
        filled_quantity: Decimal,
        current_price: Decimal,
    ) -> Result<bool, HubError>;
}

// ==================== Postgres 구현 ====================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    credential_id: Uuid,
    exchange: String,
    symbol: String,
    external_order_id: Option<String>,
    algo_order_id: Option<String>,
    side: String,
    trading_mode: String,
    leverage: Option<i32>,
    quantity: Decimal,
    filled_quantity: Decimal,
    price: Decimal,
    filled_price: Decimal,
    current_price: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = HubError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(OrderRecord {
            id: row.id,
            user_id: row.user_id,
            credential_id: row.credential_id,
            exchange: row.exchange.parse::<Exchange>().map_err(HubError::Row)?,
            symbol: row.symbol,
            external_order_id: row.external_order_id,
            algo_order_id: row.algo_order_id,
            side: row.side.parse::<OrderSide>().map_err(HubError::Row)?,
            trading_mode: row
                .trading_mode
                .parse::<TradingMode>()
                .map_err(HubError::Row)?,
            leverage: row.leverage,
            quantity: row.quantity,
            filled_quantity: row.filled_quantity,
            price: row.price,
            filled_price: row.filled_price,
            current_price: row.current_price,
            status: row.status.parse::<OrderStatus>().map_err(HubError::Row)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = r#"
    id, user_id, credential_id, exchange, symbol, external_order_id,
    algo_order_id, side, trading_mode, leverage, quantity, filled_quantity,
    price, filled_price, current_price, status, created_at, updated_at
"#;

/// Postgres 주문 저장소.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn load_candidates(&self) -> Result<Vec<OrderRecord>, HubError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE (trading_mode = 'futures' AND status NOT IN ('closed', 'failed'))
               OR (trading_mode = 'spot' AND status IN ('pending', 'new', 'partially_filled'))
            ORDER BY created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        // 손상된 행은 틱 전체를 막지 않고 건너뜀
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match OrderRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!(order_id = %id, error = %e, "주문 행 해석 실패, 건너뜀"),
            }
        }

        Ok(records)
    }

    async fn apply_stream_update(
        &self,
        key: &ConnectionKey,
        update: &CanonicalOrderUpdate,
    ) -> Result<Option<OrderRecord>, HubError> {
        let Some(external_order_id) = update.external_order_id.as_deref() else {
            return Ok(None);
        };

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE credential_id = $1 AND external_order_id = $2
            "#
        ))
        .bind(key.credential_id)
        .bind(external_order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            // 대시보드 밖에서 낸 주문의 체결 보고일 수 있음
            return Ok(None);
        };
        let record = OrderRecord::try_from(row)?;

        if !record
            .status
            .accepts_transition_to(update.status, record.trading_mode)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, filled_quantity = $3, filled_price = $4,
                current_price = $5, updated_at = $6
            WHERE id = $1 AND status <> ALL($7)
            "#,
        )
        .bind(record.id)
        .bind(update.status.as_str())
        .bind(update.filled_quantity)
        .bind(update.filled_price)
        .bind(update.current_price)
        .bind(now)
        .bind(terminal_statuses(record.trading_mode))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // 경쟁 쓰기가 먼저 종료 상태로 만든 경우
            return Ok(None);
        }

        Ok(Some(OrderRecord {
            status: update.status,
            filled_quantity: update.filled_quantity,
            filled_price: update.filled_price,
            current_price: update.current_price,
            updated_at: now,
            ..record
        }))
    }

    async fn apply_status(
        &self,
        order: &OrderRecord,
        next: OrderStatus,
        filled_price: Decimal,
        filled_quantity: Decimal,
        current_price: Decimal,
    ) -> Result<bool, HubError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, filled_price = $3, filled_quantity = $4,
                current_price = $5, updated_at = $6
            WHERE id = $1 AND status <> ALL($7)
            "#,
        )
        .bind(order.id)
        .bind(next.as_str())
        .bind(filled_price)
        .bind(filled_quantity)
        .bind(current_price)
        .bind(Utc::now())
        .bind(terminal_statuses(order.trading_mode))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
