//! 현재가 조회 (best-effort).
//!
//! 스트림/폴링 경로 모두 업데이트 페이로드에 현재가를 첨부합니다.
//! 조회 실패는 동기화를 막지 않습니다: 경고 로그 후 0을 반환하고,
//! 소비자는 0을 "시세 없음"으로 해석합니다.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use ordersync_core::TradingMode;

use crate::adapter::BinanceEndpoints;
use crate::{ExchangeError, ExchangeResult};

/// 시세 조회 타임아웃. 업데이트 전달을 오래 붙잡지 않도록 짧게 잡습니다.
const PRICE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

/// Binance 현재가 조회기.
pub struct MarketPriceFetcher {
    endpoints: BinanceEndpoints,
    http: reqwest::Client,
}

impl MarketPriceFetcher {
    pub fn new(endpoints: BinanceEndpoints) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(PRICE_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self { endpoints, http })
    }

    /// 현재가 조회. 실패 시 0.
    pub async fn current_price(&self, symbol: &str, mode: TradingMode) -> Decimal {
        match self.fetch(symbol, mode).await {
            Ok(price) => price,
            Err(e) => {
                warn!(symbol, mode = %mode, error = %e, "현재가 조회 실패, 0으로 대체");
                Decimal::ZERO
            }
        }
    }

    async fn fetch(&self, symbol: &str, mode: TradingMode) -> ExchangeResult<Decimal> {
        let url = match mode {
            TradingMode::Spot => {
                format!("{}/api/v3/ticker/price", self.endpoints.spot_api)
            }
            TradingMode::Futures => {
                format!("{}/fapi/v1/ticker/price", self.endpoints.futures_api)
            }
        };

        let response = self
            .http
            .get(url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExchangeError::Api(format!(
                "시세 응답 {}",
                response.status()
            )));
        }

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        Decimal::from_str(&ticker.price).map_err(|e| ExchangeError::Parse(e.to_string()))
    }
}
