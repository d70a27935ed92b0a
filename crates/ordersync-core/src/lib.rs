//! 실시간 주문 동기화 시스템의 핵심 도메인 타입.
//!
//! 거래소 중립적인 주문/포지션 모델과 상태 머신, 자격증명 암호화를 제공합니다.
//!
//! # 주요 컴포넌트
//!
//! - [`domain::OrderStatus`]: 거래 모드별 주문 상태 머신
//! - [`domain::CanonicalOrderUpdate`]: 스트림/폴링 공통 업데이트 이벤트
//! - [`crypto::CredentialVault`]: API 자격증명 암복호화 (AES-256-GCM)

pub mod crypto;
pub mod domain;

pub use crypto::{CredentialVault, CryptoError};
pub use domain::{
    CanonicalOrderUpdate, ConnectionKey, Exchange, OrderRecord, OrderSide, OrderStatus,
    PositionSnapshot, TradingMode, WsEnvelope,
};
