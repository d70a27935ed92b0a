//! 원시 스트림 프레임 → 정규화 주문 업데이트 변환.
//!
//! 거래소별 user data stream 프레임 형식을 여기서만 해석합니다.
//! 주문과 무관한 프레임(잔고, 핑 페이로드 등)은 `None`으로 무시하며,
//! 변환 성공 시 현재가를 best-effort로 첨부합니다.
//!
//! 반환된 업데이트의 `order_id`는 nil입니다. 영속 계층이 거래소 주문번호로
//! 내부 레코드를 찾은 뒤 채웁니다.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use ordersync_core::{CanonicalOrderUpdate, Exchange, OrderSide, OrderStatus, TradingMode};

use crate::price::MarketPriceFetcher;
use crate::{ExchangeError, ExchangeResult};

/// 프레임을 해석할 때 필요한 세션 맥락.
#[derive(Debug, Clone, Copy)]
pub struct TranslationContext {
    pub user_id: Uuid,
    pub exchange: Exchange,
    pub trading_mode: TradingMode,
}

/// 프레임 변환 seam.
#[async_trait]
pub trait MessageTranslator: Send + Sync {
    /// 주문 관련 프레임이면 정규화 업데이트, 아니면 `None`.
    async fn translate(
        &self,
        ctx: &TranslationContext,
        frame: &Value,
    ) -> Option<CanonicalOrderUpdate>;
}

/// 문자열 또는 숫자로 오는 수치 필드 파싱. 없거나 못 읽으면 0.
fn dec_field(obj: &Value, key: &str) -> Decimal {
    match &obj[key] {
        Value::String(s) => Decimal::from_str(s).unwrap_or_default(),
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64_retain)
            .unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn str_field<'a>(obj: &'a Value, key: &str) -> &'a str {
    obj[key].as_str().unwrap_or_default()
}

/// 밀리초 이벤트 시각 파싱. 없으면 현재 시각.
fn event_time(obj: &Value, key: &str) -> DateTime<Utc> {
    obj[key]
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Binance user data stream 변환기.
///
/// - 현물: `executionReport`
/// - 선물: `ORDER_TRADE_UPDATE` (주문 필드가 `o` 아래에 중첩)
pub struct BinanceTranslator {
    price: Arc<MarketPriceFetcher>,
}

impl BinanceTranslator {
    pub fn new(price: Arc<MarketPriceFetcher>) -> Self {
        Self { price }
    }

    fn build_update(
        &self,
        ctx: &TranslationContext,
        order: &Value,
        update_time: DateTime<Utc>,
    ) -> Option<CanonicalOrderUpdate> {
        let status = OrderStatus::from_venue(str_field(order, "X"))?;
        let side = OrderSide::from_str(str_field(order, "S")).ok()?;

        // 선물 응답의 평균 체결가(ap)를 우선, 없으면 마지막 체결가(L)
        let mut filled_price = dec_field(order, "ap");
        if filled_price.is_zero() {
            filled_price = dec_field(order, "L");
        }

        Some(CanonicalOrderUpdate {
            user_id: ctx.user_id,
            order_id: Uuid::nil(),
            external_order_id: order["i"].as_i64().map(|i| i.to_string()),
            symbol: str_field(order, "s").to_string(),
            side,
            status,
            exchange: ctx.exchange,
            trading_mode: ctx.trading_mode,
            price: dec_field(order, "p"),
            filled_price,
            filled_quantity: dec_field(order, "z"),
            current_price: Decimal::ZERO,
            update_time,
            position: None,
        })
    }
}

#[async_trait]
impl MessageTranslator for BinanceTranslator {
    async fn translate(
        &self,
        ctx: &TranslationContext,
        frame: &Value,
    ) -> Option<CanonicalOrderUpdate> {
        let time = event_time(frame, "E");

        let mut update = match frame["e"].as_str() {
            Some("executionReport") => self.build_update(ctx, frame, time)?,
            Some("ORDER_TRADE_UPDATE") => self.build_update(ctx, &frame["o"], time)?,
            _ => return None,
        };

        update.current_price = self
            .price
            .current_price(&update.symbol, ctx.trading_mode)
            .await;

        Some(update)
    }
}

/// 거래소별 변환기 팩토리.
pub fn translator_for(
    exchange: Exchange,
    price: Arc<MarketPriceFetcher>,
) -> ExchangeResult<Arc<dyn MessageTranslator>> {
    match exchange {
        Exchange::Binance => Ok(Arc::new(BinanceTranslator::new(price))),
        other => Err(ExchangeError::Unsupported(format!(
            "{} 스트림 변환은 아직 지원하지 않습니다",
            other
        ))),
    }
}
