//! 도메인 모델.

mod order;
mod update;

pub use order::{ConnectionKey, Exchange, OrderRecord, OrderSide, OrderStatus, TradingMode};
pub use update::{CanonicalOrderUpdate, PositionSnapshot, WsEnvelope};
