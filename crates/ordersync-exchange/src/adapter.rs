//! 거래소별 user data stream 수명주기 어댑터.
//!
//! Binance user data stream은 listen key 기반입니다:
//! 발급(POST) → 스트림 접속 → 60분 만료 전 주기적 연장(PUT) → 종료 시 폐기(DELETE).
//! 연장 주기는 세션 쪽에서 관리하며 어댑터는 HTTP 호출만 담당합니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use ordersync_core::{Exchange, TradingMode};

use crate::{ExchangeError, ExchangeResult};

/// HTTP 요청 타임아웃.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Binance REST/WS 엔드포인트 묶음.
///
/// 테스트넷 전환과 테스트에서의 mock 서버 주입을 위해 분리되어 있습니다.
#[derive(Debug, Clone)]
pub struct BinanceEndpoints {
    pub spot_api: String,
    pub futures_api: String,
    pub spot_ws: String,
    pub futures_ws: String,
}

impl Default for BinanceEndpoints {
    fn default() -> Self {
        Self {
            spot_api: "https://api.binance.com".to_string(),
            futures_api: "https://fapi.binance.com".to_string(),
            spot_ws: "wss://stream.binance.com:9443/ws".to_string(),
            futures_ws: "wss://fstream.binance.com/ws".to_string(),
        }
    }
}

impl BinanceEndpoints {
    /// 테스트넷 엔드포인트.
    pub fn testnet() -> Self {
        Self {
            spot_api: "https://testnet.binance.vision".to_string(),
            futures_api: "https://testnet.binancefuture.com".to_string(),
            spot_ws: "wss://stream.testnet.binance.vision/ws".to_string(),
            futures_ws: "wss://stream.binancefuture.com/ws".to_string(),
        }
    }

    /// 환경변수 기반 구성.
    ///
    /// `BINANCE_TESTNET=true`면 테스트넷을 기본값으로 하고,
    /// `BINANCE_*_URL` 변수가 있으면 개별 엔드포인트를 덮어씁니다.
    pub fn from_env() -> Self {
        let testnet = std::env::var("BINANCE_TESTNET")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut endpoints = if testnet {
            Self::testnet()
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("BINANCE_SPOT_API_URL") {
            endpoints.spot_api = url;
        }
        if let Ok(url) = std::env::var("BINANCE_FUTURES_API_URL") {
            endpoints.futures_api = url;
        }
        if let Ok(url) = std::env::var("BINANCE_SPOT_WS_URL") {
            endpoints.spot_ws = url;
        }
        if let Ok(url) = std::env::var("BINANCE_FUTURES_WS_URL") {
            endpoints.futures_ws = url;
        }

        endpoints
    }
}

/// user data stream 수명주기 seam.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// 거래소 식별자.
    fn venue(&self) -> Exchange;

    /// listen key로 접속할 스트림 URL.
    fn ws_url(&self, mode: TradingMode, listen_key: &str) -> String;

    /// listen key 발급.
    async fn create_listen_key(&self, api_key: &str, mode: TradingMode)
        -> ExchangeResult<String>;

    /// listen key 만료 연장.
    async fn keep_alive_listen_key(
        &self,
        api_key: &str,
        listen_key: &str,
        mode: TradingMode,
    ) -> ExchangeResult<()>;

    /// listen key 폐기.
    async fn close_listen_key(
        &self,
        api_key: &str,
        listen_key: &str,
        mode: TradingMode,
    ) -> ExchangeResult<()>;
}

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

/// Binance user data stream 어댑터.
pub struct BinanceAdapter {
    endpoints: BinanceEndpoints,
    http: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new(endpoints: BinanceEndpoints) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self { endpoints, http })
    }

    fn listen_key_url(&self, mode: TradingMode) -> String {
        match mode {
            TradingMode::Spot => format!("{}/api/v3/userDataStream", self.endpoints.spot_api),
            TradingMode::Futures => format!("{}/fapi/v1/listenKey", self.endpoints.futures_api),
        }
    }

    async fn check_status(response: reqwest::Response) -> ExchangeResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(ExchangeError::Unauthorized(body))
        } else {
            Err(ExchangeError::Api(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Exchange {
        Exchange::Binance
    }

    fn ws_url(&self, mode: TradingMode, listen_key: &str) -> String {
        match mode {
            TradingMode::Spot => format!("{}/{}", self.endpoints.spot_ws, listen_key),
            TradingMode::Futures => format!("{}/{}", self.endpoints.futures_ws, listen_key),
        }
    }

    async fn create_listen_key(
        &self,
        api_key: &str,
        mode: TradingMode,
    ) -> ExchangeResult<String> {
        let response = self
            .http
            .post(self.listen_key_url(mode))
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let parsed: ListenKeyResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        debug!(mode = %mode, "listen key 발급 완료");
        Ok(parsed.listen_key)
    }

    async fn keep_alive_listen_key(
        &self,
        api_key: &str,
        listen_key: &str,
        mode: TradingMode,
    ) -> ExchangeResult<()> {
        // 현물은 연장 대상 키를 쿼리로 지정, 선물은 계정당 1개라 키 생략
        let mut request = self
            .http
            .put(self.listen_key_url(mode))
            .header("X-MBX-APIKEY", api_key);
        if mode == TradingMode::Spot {
            request = request.query(&[("listenKey", listen_key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Self::check_status(response).await?;

        debug!(mode = %mode, "listen key 연장 완료");
        Ok(())
    }

    async fn close_listen_key(
        &self,
        api_key: &str,
        listen_key: &str,
        mode: TradingMode,
    ) -> ExchangeResult<()> {
        let mut request = self
            .http
            .delete(self.listen_key_url(mode))
            .header("X-MBX-APIKEY", api_key);
        if mode == TradingMode::Spot {
            request = request.query(&[("listenKey", listen_key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }
}

/// 거래소별 어댑터 팩토리.
pub fn adapter_for(exchange: Exchange) -> ExchangeResult<Arc<dyn VenueAdapter>> {
    match exchange {
        Exchange::Binance => Ok(Arc::new(BinanceAdapter::new(BinanceEndpoints::from_env())?)),
        other => Err(ExchangeError::Unsupported(format!(
            "{} user data stream은 아직 지원하지 않습니다",
            other
        ))),
    }
}
