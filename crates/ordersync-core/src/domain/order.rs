//! 주문 도메인 타입과 상태 머신.
//!
//! 거래 모드(현물/선물)에 따라 종료 상태가 다릅니다:
//!
//! - 현물: `pending → new → partially_filled → filled` (filled가 종료 상태)
//! - 선물: 주문 또는 연결된 조건부 주문(SL/TP), 포지션 중 하나라도 살아 있으면
//!   "running"이며, 모두 종료된 뒤에만 `closed`로 전이
//! - `failed`는 모든 비종료 상태에서 도달 가능하며 종료 상태
//!
//! 종료 상태에 도달한 주문은 어떤 경로(스트림/폴링)로도 되돌릴 수 없습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 거래 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// 현물 거래
    Spot,
    /// 선물 거래 (포지션/레버리지 존재)
    Futures,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Futures => write!(f, "futures"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" | "" => Ok(Self::Spot),
            "futures" => Ok(Self::Futures),
            other => Err(format!("알 수 없는 거래 모드: {}", other)),
        }
    }
}

/// 지원 거래소.
///
/// 신규 거래소는 variant 추가 후 ordersync-exchange의
/// adapter/gateway/translator 팩토리에 구현을 연결합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Okx,
    Bybit,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Okx => write!(f, "okx"),
            Self::Bybit => write!(f, "bybit"),
        }
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "okx" => Ok(Self::Okx),
            "bybit" => Ok(Self::Bybit),
            other => Err(format!("지원하지 않는 거래소: {}", other)),
        }
    }
}

/// 매수/매도 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("알 수 없는 주문 방향: {}", other)),
        }
    }
}

/// 하나의 업스트림 스트림을 식별하는 키.
///
/// (거래소, 거래 모드, 자격증명) 조합당 라이브 세션은 최대 1개입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub exchange: Exchange,
    pub trading_mode: TradingMode,
    pub credential_id: Uuid,
}

impl ConnectionKey {
    pub fn new(exchange: Exchange, trading_mode: TradingMode, credential_id: Uuid) -> Self {
        Self {
            exchange,
            trading_mode,
            credential_id,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.exchange, self.trading_mode, self.credential_id
        )
    }
}

/// 주문 상태.
///
/// 전이는 단조(monotonic)입니다. [`OrderStatus::accepts_transition_to`]가
/// 허용하지 않는 쓰기는 어느 컴포넌트에서도 수행해서는 안 됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 거래소 접수 대기
    Pending,
    /// 거래소 접수 완료, 미체결
    New,
    /// 부분 체결
    PartiallyFilled,
    /// 전량 체결 (현물 종료 상태, 선물은 포지션 종료 전까지 running)
    Filled,
    /// 선물 포지션/조건부 주문까지 모두 종료됨 (종료 상태)
    Closed,
    /// 실패/취소/거부 (종료 상태)
    Failed,
}

impl OrderStatus {
    /// DB 컬럼 및 페이로드에 쓰이는 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::New => "new",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// 거래소 응답 상태 문자열을 정규화.
    ///
    /// CANCELED / REJECTED / EXPIRED는 모두 `Failed`로 접습니다.
    pub fn from_venue(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "pending_new" => Some(Self::Pending),
            "new" | "open" | "accepted" => Some(Self::New),
            "partially_filled" => Some(Self::PartiallyFilled),
            "filled" => Some(Self::Filled),
            "closed" => Some(Self::Closed),
            "canceled" | "cancelled" | "rejected" | "expired" | "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// 상태 머신 상의 순서. 전이는 이 값이 증가하는 방향으로만 허용됩니다.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::New => 1,
            Self::PartiallyFilled => 2,
            Self::Filled => 3,
            Self::Closed => 4,
            Self::Failed => 5,
        }
    }

    /// 해당 거래 모드에서 종료 상태인지 여부.
    ///
    /// - `Failed`, `Closed`: 항상 종료
    /// - `Filled`: 현물에서만 종료 (선물은 포지션이 남아 있을 수 있음)
    pub fn is_terminal(&self, mode: TradingMode) -> bool {
        match self {
            Self::Failed | Self::Closed => true,
            Self::Filled => mode == TradingMode::Spot,
            _ => false,
        }
    }

    /// `next`로의 전이가 상태 머신상 허용되는지 여부.
    ///
    /// 종료 상태에서 빠져나가는 전이와 역방향 전이는 거부됩니다.
    /// 동일 상태로의 전이(no-op)는 허용됩니다.
    pub fn accepts_transition_to(&self, next: OrderStatus, mode: TradingMode) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal(mode) {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_venue(s).ok_or_else(|| format!("알 수 없는 주문 상태: {}", s))
    }
}

/// 영속화된 주문 레코드.
///
/// 소유권은 영속 계층에 있으며, 동기화 코어는 status와 체결 필드만 갱신합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential_id: Uuid,
    pub exchange: Exchange,
    pub symbol: String,
    /// 거래소 발급 주문번호. 아직 접수 전이면 None.
    pub external_order_id: Option<String>,
    /// 연결된 조건부 주문(SL/TP)의 algo id (선물 전용)
    pub algo_order_id: Option<String>,
    pub side: OrderSide,
    pub trading_mode: TradingMode,
    pub leverage: Option<i32>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Decimal,
    pub filled_price: Decimal,
    pub current_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// 이 주문의 스트림 연결 키.
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey::new(self.exchange, self.trading_mode, self.credential_id)
    }
}
