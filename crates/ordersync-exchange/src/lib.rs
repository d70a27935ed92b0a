//! 거래소 경계 계층.
//!
//! 주문 동기화 코어가 거래소를 직접 알지 못하도록 네 가지 seam을 제공합니다:
//!
//! - [`adapter::VenueAdapter`] - listen key 수명주기와 스트림 URL
//! - [`gateway::OrderGateway`] - 서명된 REST 주문/포지션 조회
//! - [`translator::MessageTranslator`] - 원시 프레임 → 정규화 업데이트
//! - [`price::MarketPriceFetcher`] - 현재가 조회 (best-effort)
//!
//! 신규 거래소 지원은 이 네 trait 구현 추가만으로 끝납니다.

pub mod adapter;
pub mod gateway;
pub mod price;
pub mod translator;

use thiserror::Error;

/// 거래소 경계 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크 오류 (연결 실패, 타임아웃)
    #[error("네트워크 오류: {0}")]
    Network(String),

    /// 거래소 API 에러 응답 (4xx/5xx, 에러 코드)
    #[error("거래소 API 오류: {0}")]
    Api(String),

    /// 인증 실패 (잘못된 API 키/서명)
    #[error("인증 실패: {0}")]
    Unauthorized(String),

    /// 응답 파싱 실패
    #[error("응답 파싱 실패: {0}")]
    Parse(String),

    /// 해당 거래소/기능 미지원
    #[error("미지원: {0}")]
    Unsupported(String),
}

/// 거래소 경계 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

pub use adapter::{adapter_for, BinanceAdapter, BinanceEndpoints, VenueAdapter};
pub use gateway::{
    BinanceGateway, GatewayFactory, LiveGatewayFactory, OrderGateway, OrderStatusReport,
    RunningKind,
};
pub use price::MarketPriceFetcher;
pub use translator::{translator_for, BinanceTranslator, MessageTranslator, TranslationContext};
