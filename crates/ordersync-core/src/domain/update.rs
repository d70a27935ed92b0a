//! 정규화 업데이트 이벤트와 브라우저 전달 페이로드.
//!
//! 스트림 경로와 폴링(정합성 점검) 경로는 모두 [`CanonicalOrderUpdate`]를
//! 생성하며, 브로드캐스터는 이 타입만 이해합니다. 수신 경로와 전달이
//! 결합되지 않도록 하는 유일한 교차점입니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{Exchange, OrderSide, OrderStatus, TradingMode};

/// 선물 포지션 스냅샷.
///
/// 정합성 점검 패스마다 새로 조회하며 틱 간 캐시하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// 부호 있는 포지션 수량 (롱 양수, 숏 음수)
    pub position_amt: Decimal,
    pub position_side: String,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub liquidation_price: Decimal,
    pub unrealized_profit: Decimal,
    pub pnl_percent: Decimal,
    pub leverage: i32,
    pub margin_type: String,
    pub isolated_margin: Decimal,
}

impl PositionSnapshot {
    /// 포지션이 실질적으로 열려 있는지 여부.
    pub fn is_open(&self) -> bool {
        !self.position_amt.is_zero()
    }
}

/// 수신 경로와 무관한 정규화 주문 업데이트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalOrderUpdate {
    /// 라우팅 전용. 전달 페이로드에는 포함하지 않습니다.
    #[serde(skip_serializing)]
    #[serde(default = "Uuid::nil")]
    pub user_id: Uuid,
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub exchange: Exchange,
    pub trading_mode: TradingMode,
    pub price: Decimal,
    pub filled_price: Decimal,
    pub filled_quantity: Decimal,
    /// 시세 조회 실패 시 0
    pub current_price: Decimal,
    pub update_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionSnapshot>,
}

impl CanonicalOrderUpdate {
    /// 포지션 스냅샷을 첨부한 사본 반환.
    pub fn with_position(mut self, position: PositionSnapshot) -> Self {
        self.position = Some(position);
        self
    }
}

/// 구독자에게 전달되는 봉투 `{type, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl WsEnvelope {
    /// 주문 업데이트 봉투 생성.
    ///
    /// 직렬화는 전달 시점에 한 번만 수행하고 모든 구독자가 공유합니다.
    pub fn order_update(update: &CanonicalOrderUpdate) -> Self {
        Self {
            kind: "order_update".to_string(),
            data: serde_json::to_value(update).unwrap_or(serde_json::Value::Null),
        }
    }
}
