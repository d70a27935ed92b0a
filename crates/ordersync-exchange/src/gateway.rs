//! 서명된 REST 주문/포지션 조회 게이트웨이.
//!
//! 정합성 점검(폴링) 경로가 사용하는 유일한 거래소 REST 표면입니다.
//! 주문 상태, 연결된 조건부 주문(algo) 상태, 선물 포지션 세 가지를 조회합니다.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use ordersync_core::{Exchange, OrderStatus, PositionSnapshot, TradingMode};

use crate::adapter::BinanceEndpoints;
use crate::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW_MS: u64 = 5000;

/// 주문이 살아 있는 이유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningKind {
    /// 살아 있지 않음
    None,
    /// 일반 주문이 미체결/부분체결 상태
    Normal,
    /// 연결된 조건부 주문(SL/TP)이 대기 중
    Algo,
}

/// 주문 상태 조회 결과.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub orig_qty: Decimal,
    /// 평균 체결가. 현물 응답에 없으면 누적 체결 금액에서 역산합니다.
    pub avg_fill_price: Decimal,
    /// 일반 주문 또는 조건부 주문이 아직 살아 있는지 여부.
    /// 포지션 생존 여부는 포함하지 않습니다 (별도 [`OrderGateway::get_position`]).
    pub is_running: bool,
    pub running_kind: RunningKind,
}

/// 주문/포지션 조회 seam.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn venue(&self) -> Exchange;

    /// 주문 상태 조회. 선물이고 `algo_order_id`가 있으면 조건부 주문 생존도 확인합니다.
    async fn check_order_status(
        &self,
        mode: TradingMode,
        symbol: &str,
        external_order_id: &str,
        algo_order_id: Option<&str>,
    ) -> ExchangeResult<OrderStatusReport>;

    /// 선물 포지션 조회. 해당 심볼 포지션이 없으면 `None`.
    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>>;
}

/// 자격증명별 게이트웨이 생성 seam.
///
/// 정합성 점검 틱마다 복호화된 자격증명으로 게이트웨이를 만듭니다.
pub trait GatewayFactory: Send + Sync {
    fn create(
        &self,
        exchange: Exchange,
        api_key: &str,
        api_secret: &str,
    ) -> ExchangeResult<Arc<dyn OrderGateway>>;
}

/// 실거래 게이트웨이 팩토리.
pub struct LiveGatewayFactory {
    endpoints: BinanceEndpoints,
}

impl LiveGatewayFactory {
    pub fn new(endpoints: BinanceEndpoints) -> Self {
        Self { endpoints }
    }
}

impl GatewayFactory for LiveGatewayFactory {
    fn create(
        &self,
        exchange: Exchange,
        api_key: &str,
        api_secret: &str,
    ) -> ExchangeResult<Arc<dyn OrderGateway>> {
        match exchange {
            Exchange::Binance => Ok(Arc::new(BinanceGateway::new(
                self.endpoints.clone(),
                api_key,
                api_secret,
            )?)),
            other => Err(ExchangeError::Unsupported(format!(
                "{} 주문 조회는 아직 지원하지 않습니다",
                other
            ))),
        }
    }
}

// ==================== Binance 응답 구조 ====================

#[derive(Deserialize)]
struct BinanceOrderResponse {
    status: String,
    #[serde(rename = "origQty", default)]
    orig_qty: String,
    #[serde(rename = "executedQty", default)]
    executed_qty: String,
    /// 선물 전용
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    /// 현물 전용. avgPrice가 없을 때 역산에 사용
    #[serde(rename = "cummulativeQuoteQty", default)]
    cumulative_quote_qty: String,
}

#[derive(Deserialize)]
struct BinanceAlgoOrder {
    #[serde(rename = "algoId")]
    algo_id: i64,
    #[serde(default)]
    symbol: String,
}

#[derive(Deserialize)]
struct BinanceOpenAlgoOrders {
    #[serde(default)]
    orders: Vec<BinanceAlgoOrder>,
}

#[derive(Deserialize)]
struct BinancePositionRisk {
    symbol: String,
    #[serde(rename = "positionAmt", default)]
    position_amt: String,
    #[serde(rename = "positionSide", default)]
    position_side: String,
    #[serde(rename = "entryPrice", default)]
    entry_price: String,
    #[serde(rename = "markPrice", default)]
    mark_price: String,
    #[serde(rename = "liquidationPrice", default)]
    liquidation_price: String,
    #[serde(rename = "unRealizedProfit", default)]
    unrealized_profit: String,
    #[serde(default)]
    leverage: String,
    #[serde(rename = "marginType", default)]
    margin_type: String,
    #[serde(rename = "isolatedMargin", default)]
    isolated_margin: String,
}

/// 숫자 문자열 파싱. 거래소가 빈 문자열을 주는 필드가 있어 0으로 접습니다.
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

// ==================== Binance 게이트웨이 ====================

/// Binance 서명 REST 게이트웨이.
pub struct BinanceGateway {
    endpoints: BinanceEndpoints,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
}

impl BinanceGateway {
    pub fn new(
        endpoints: BinanceEndpoints,
        api_key: &str,
        api_secret: &str,
    ) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self {
            endpoints,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            http,
        })
    }

    /// 쿼리 문자열에 timestamp/recvWindow/signature를 붙입니다.
    fn sign(&self, query: &str) -> ExchangeResult<String> {
        let query = format!(
            "{}{}recvWindow={}&timestamp={}",
            query,
            if query.is_empty() { "" } else { "&" },
            RECV_WINDOW_MS,
            Utc::now().timestamp_millis()
        );

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Unauthorized(e.to_string()))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query, signature))
    }

    async fn signed_get(&self, base: &str, path: &str, query: &str) -> ExchangeResult<String> {
        let url = format!("{}{}?{}", base, path, self.sign(query)?);

        let response = self
            .http
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(ExchangeError::Unauthorized(body))
        } else {
            Err(ExchangeError::Api(format!("{}: {}", status, body)))
        }
    }

    /// 연결된 조건부 주문(SL/TP)이 아직 대기 중인지 확인.
    async fn is_algo_order_open(&self, symbol: &str, algo_order_id: &str) -> ExchangeResult<bool> {
        let body = self
            .signed_get(&self.endpoints.futures_api, "/fapi/v1/openAlgoOrders", "")
            .await?;

        let open: BinanceOpenAlgoOrders =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

        Ok(open
            .orders
            .iter()
            .any(|o| o.algo_id.to_string() == algo_order_id && o.symbol == symbol))
    }
}

#[async_trait]
impl OrderGateway for BinanceGateway {
    fn venue(&self) -> Exchange {
        Exchange::Binance
    }

    async fn check_order_status(
        &self,
        mode: TradingMode,
        symbol: &str,
        external_order_id: &str,
        algo_order_id: Option<&str>,
    ) -> ExchangeResult<OrderStatusReport> {
        let (base, path) = match mode {
            TradingMode::Spot => (self.endpoints.spot_api.as_str(), "/api/v3/order"),
            TradingMode::Futures => (self.endpoints.futures_api.as_str(), "/fapi/v1/order"),
        };

        let query = format!("symbol={}&orderId={}", symbol, external_order_id);
        let body = self.signed_get(base, path, &query).await?;

        let order: BinanceOrderResponse =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let status = OrderStatus::from_venue(&order.status)
            .ok_or_else(|| ExchangeError::Parse(format!("알 수 없는 주문 상태: {}", order.status)))?;

        let executed_qty = dec(&order.executed_qty);
        let mut avg_fill_price = dec(&order.avg_price);
        if avg_fill_price.is_zero() && !executed_qty.is_zero() {
            avg_fill_price = dec(&order.cumulative_quote_qty) / executed_qty;
        }

        // 일반 주문 생존 여부
        let mut is_running = matches!(status, OrderStatus::New | OrderStatus::PartiallyFilled);
        let mut running_kind = if is_running {
            RunningKind::Normal
        } else {
            RunningKind::None
        };

        // 일반 주문이 끝났어도 조건부 주문이 대기 중이면 running
        if !is_running && mode == TradingMode::Futures {
            if let Some(algo_id) = algo_order_id {
                if self.is_algo_order_open(symbol, algo_id).await? {
                    is_running = true;
                    running_kind = RunningKind::Algo;
                }
            }
        }

        debug!(
            symbol,
            order_id = external_order_id,
            status = %status,
            is_running,
            "주문 상태 조회"
        );

        Ok(OrderStatusReport {
            status,
            executed_qty,
            orig_qty: dec(&order.orig_qty),
            avg_fill_price,
            is_running,
            running_kind,
        })
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>> {
        let query = format!("symbol={}", symbol);
        let body = self
            .signed_get(&self.endpoints.futures_api, "/fapi/v2/positionRisk", &query)
            .await?;

        let positions: Vec<BinancePositionRisk> =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let Some(row) = positions.into_iter().find(|p| p.symbol == symbol) else {
            return Ok(None);
        };

        let position_amt = dec(&row.position_amt);
        let entry_price = dec(&row.entry_price);
        let unrealized_profit = dec(&row.unrealized_profit);
        let leverage = row.leverage.parse::<i32>().unwrap_or(1);

        // 증거금 대비 수익률 (ROE)
        let margin = if entry_price.is_zero() || position_amt.is_zero() {
            Decimal::ZERO
        } else {
            entry_price * position_amt.abs() / Decimal::from(leverage.max(1))
        };
        let pnl_percent = if margin.is_zero() {
            Decimal::ZERO
        } else {
            unrealized_profit / margin * Decimal::from(100)
        };

        Ok(Some(PositionSnapshot {
            symbol: row.symbol,
            position_amt,
            position_side: row.position_side,
            entry_price,
            mark_price: dec(&row.mark_price),
            liquidation_price: dec(&row.liquidation_price),
            unrealized_profit,
            pnl_percent,
            leverage,
            margin_type: row.margin_type,
            isolated_margin: dec(&row.isolated_margin),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal_macros::dec as d;

    fn gateway(server: &mockito::Server) -> BinanceGateway {
        let endpoints = BinanceEndpoints {
            spot_api: server.url(),
            futures_api: server.url(),
            ..BinanceEndpoints::default()
        };
        BinanceGateway::new(endpoints, "test-key", "test-secret").unwrap()
    }

    #[test]
    fn signed_query_shape() {
        let server_less = BinanceGateway::new(
            BinanceEndpoints::default(),
            "key",
            "secret",
        )
        .unwrap();

        let signed = server_less.sign("symbol=BTCUSDT&orderId=1").unwrap();
        assert!(signed.starts_with("symbol=BTCUSDT&orderId=1&recvWindow=5000&timestamp="));
        let signature = signed.rsplit("&signature=").next().unwrap();
        // HMAC-SHA256 hex = 64자
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn spot_filled_order_backfills_avg_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/order")
            .match_query(Matcher::Regex("symbol=BTCUSDT&orderId=42&.*signature=".to_string()))
            .match_header("X-MBX-APIKEY", "test-key")
            .with_body(
                r#"{"symbol":"BTCUSDT","orderId":42,"status":"FILLED",
                    "origQty":"0.50000000","executedQty":"0.50000000",
                    "cummulativeQuoteQty":"21000.00000000"}"#,
            )
            .create_async()
            .await;

        let report = gateway(&server)
            .check_order_status(TradingMode::Spot, "BTCUSDT", "42", None)
            .await
            .unwrap();

        assert_eq!(report.status, OrderStatus::Filled);
        assert!(!report.is_running);
        assert_eq!(report.running_kind, RunningKind::None);
        assert_eq!(report.avg_fill_price, d!(42000));
    }

    #[tokio::test]
    async fn futures_filled_with_open_algo_is_running() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .with_body(
                r#"{"symbol":"ETHUSDT","orderId":7,"status":"FILLED",
                    "origQty":"1","executedQty":"1","avgPrice":"3000.0"}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/fapi/v1/openAlgoOrders")
            .match_query(Matcher::Any)
            .with_body(r#"{"total":1,"orders":[{"algoId":991,"symbol":"ETHUSDT"}]}"#)
            .create_async()
            .await;

        let report = gateway(&server)
            .check_order_status(TradingMode::Futures, "ETHUSDT", "7", Some("991"))
            .await
            .unwrap();

        assert_eq!(report.status, OrderStatus::Filled);
        assert!(report.is_running);
        assert_eq!(report.running_kind, RunningKind::Algo);
    }

    #[tokio::test]
    async fn position_risk_maps_to_snapshot() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_body(
                r#"[{"symbol":"ETHUSDT","positionAmt":"0.300","positionSide":"LONG",
                     "entryPrice":"3000.0","markPrice":"3100.0","liquidationPrice":"2500.0",
                     "unRealizedProfit":"30.0","leverage":"10","marginType":"isolated",
                     "isolatedMargin":"90.0"}]"#,
            )
            .create_async()
            .await;

        let snapshot = gateway(&server)
            .get_position("ETHUSDT")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.position_amt, d!(0.3));
        assert_eq!(snapshot.leverage, 10);
        assert!(snapshot.is_open());
        // 증거금 90 USDT 대비 30 USDT 수익 → 약 33%
        assert!(snapshot.pnl_percent > d!(33) && snapshot.pnl_percent < d!(34));
    }

    #[tokio::test]
    async fn missing_position_returns_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;

        let snapshot = gateway(&server).get_position("ETHUSDT").await.unwrap();
        assert!(snapshot.is_none());
    }

    #[test]
    fn factory_rejects_unsupported_venue() {
        let factory = LiveGatewayFactory::new(BinanceEndpoints::default());
        assert!(matches!(
            factory.create(Exchange::Bybit, "k", "s"),
            Err(ExchangeError::Unsupported(_))
        ));
    }
}
