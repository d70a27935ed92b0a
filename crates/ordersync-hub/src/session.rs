//! 업스트림 스트림 seam과 세션 생성 시 선택되는 거래소 전략.
//!
//! 세션당 거래소 전략(어댑터/변환기)은 생성 시점에 한 번 선택되며
//! 프레임마다 재분기하지 않습니다. 실제 네트워크 구현과 테스트용 mock이
//! 같은 trait 뒤에 놓입니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::warn;

use ordersync_core::Exchange;
use ordersync_exchange::{
    adapter_for, translator_for, ExchangeResult, MarketPriceFetcher, MessageTranslator,
    VenueAdapter,
};

use crate::HubError;

/// 업스트림 접속 타임아웃.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 수신 프레임 스트림.
///
/// `Ok(None)`은 정상 종료, `Err`는 읽기 오류입니다. 어느 쪽이든
/// 세션은 해체되며 재접속하지 않습니다 (새 subscribe가 다시 접속).
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Result<Option<Value>, HubError>;
}

/// 스트림 접속 seam.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>, HubError>;
}

/// tokio-tungstenite 기반 실제 접속기.
pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>, HubError> {
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| HubError::Dial(format!("접속 타임아웃: {}", url)))?
            .map_err(|e| HubError::Dial(e.to_string()))?;

        Ok(Box::new(WsFrameStream { ws }))
    }
}

struct WsFrameStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Result<Option<Value>, HubError> {
        loop {
            match self.ws.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(value) => return Ok(Some(value)),
                    Err(e) => {
                        // JSON 아닌 프레임은 버리고 계속 읽음
                        warn!(error = %e, "JSON 파싱 불가 프레임 무시");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| HubError::Read(e.to_string()))?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(HubError::Read(e.to_string())),
            }
        }
    }
}

/// 거래소별 user data stream 어댑터 선택 seam.
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn VenueAdapter>>;
}

/// 실거래 어댑터 팩토리 (환경변수 기반 엔드포인트).
pub struct LiveAdapterFactory;

impl AdapterFactory for LiveAdapterFactory {
    fn adapter(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn VenueAdapter>> {
        adapter_for(exchange)
    }
}

/// 거래소별 프레임 변환기 선택 seam.
pub trait TranslatorFactory: Send + Sync {
    fn translator(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn MessageTranslator>>;
}

/// 실거래 변환기 팩토리.
pub struct LiveTranslatorFactory {
    price: Arc<MarketPriceFetcher>,
}

impl LiveTranslatorFactory {
    pub fn new(price: Arc<MarketPriceFetcher>) -> Self {
        Self { price }
    }
}

impl TranslatorFactory for LiveTranslatorFactory {
    fn translator(&self, exchange: Exchange) -> ExchangeResult<Arc<dyn MessageTranslator>> {
        translator_for(exchange, Arc::clone(&self.price))
    }
}
