//! 테스트 공용 mock: 접속기/어댑터/변환기/저장소/자격증명/게이트웨이.

#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use ordersync_core::{
    CanonicalOrderUpdate, ConnectionKey, CryptoError, Exchange, OrderRecord, OrderSide,
    OrderStatus, PositionSnapshot, TradingMode,
};
use ordersync_exchange::{
    ExchangeError, ExchangeResult, GatewayFactory, MessageTranslator, OrderGateway,
    OrderStatusReport, RunningKind, TranslationContext, VenueAdapter,
};
use ordersync_hub::{
    AdapterFactory, CredentialSource, FrameStream, HubError, OrderStore, StreamConnector,
    TranslatorFactory,
};
use ordersync_hub::credentials::DecryptedCredentials;

// ==================== 접속기 ====================

/// 대본(frame 채널) 기반 스트림. 대본이 없으면 영원히 대기합니다.
pub enum ScriptedStream {
    Frames(mpsc::UnboundedReceiver<Result<Option<Value>, HubError>>),
    Pending,
}

#[async_trait]
impl FrameStream for ScriptedStream {
    async fn next_frame(&mut self) -> Result<Option<Value>, HubError> {
        match self {
            Self::Frames(rx) => match rx.recv().await {
                Some(item) => item,
                // 송신측이 닫히면 정상 종료로 취급
                None => Ok(None),
            },
            Self::Pending => futures::future::pending().await,
        }
    }
}

/// dial 횟수를 세는 mock 접속기.
///
/// 준비된 대본을 dial 순서대로 하나씩 소모하고, 바닥나면 영원히 침묵하는
/// 스트림을 내줍니다. `fail_dials`가 남아 있으면 dial 자체가 실패합니다.
pub struct MockConnector {
    scripts: Mutex<Vec<ScriptedStream>>,
    pub dials: AtomicUsize,
    fail_dials: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
            dials: AtomicUsize::new(0),
            fail_dials: AtomicUsize::new(0),
        })
    }

    /// 다음 dial에 연결될 프레임 송신 채널을 등록합니다.
    pub async fn push_script(&self) -> mpsc::UnboundedSender<Result<Option<Value>, HubError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().await.push(ScriptedStream::Frames(rx));
        tx
    }

    /// 다음 n번의 dial을 실패시킵니다.
    pub fn fail_next_dials(&self, n: usize) {
        self.fail_dials.store(n, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>, HubError> {
        if self.fail_dials.load(Ordering::SeqCst) > 0 {
            self.fail_dials.fetch_sub(1, Ordering::SeqCst);
            return Err(HubError::Dial("mock dial 실패".to_string()));
        }

        self.dials.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().await;
        if scripts.is_empty() {
            Ok(Box::new(ScriptedStream::Pending))
        } else {
            Ok(Box::new(scripts.remove(0)))
        }
    }
}

// ==================== 어댑터 ====================

/// 네트워크 없는 mock 어댑터.
pub struct MockAdapter;

#[async_trait]
impl VenueAdapter for MockAdapter {
    fn venue(&self) -> Exchange {
        Exchange::Binance
    }

    fn ws_url(&self, mode: TradingMode, listen_key: &str) -> String {
        format!("wss://mock/{}/{}", mode, listen_key)
    }

    async fn create_listen_key(
        &self,
        _api_key: &str,
        _mode: TradingMode,
    ) -> ExchangeResult<String> {
        Ok("mock-listen-key".to_string())
    }

    async fn keep_alive_listen_key(
        &self,
        _api_key: &str,
        _listen_key: &str,
        _mode: TradingMode,
    ) -> ExchangeResult<()> {
        Ok(())
    }

    async fn close_listen_key(
        &self,
        _api_key: &str,
        _listen_key: &str,
        _mode: TradingMode,
    ) -> ExchangeResult<()> {
        Ok(())
    }
}

pub struct MockAdapterFactory;

impl AdapterFactory for MockAdapterFactory {
    fn adapter(&self, _exchange: Exchange) -> ExchangeResult<Arc<dyn VenueAdapter>> {
        Ok(Arc::new(MockAdapter))
    }
}

// ==================== 변환기 ====================

/// 단순화된 테스트 프레임 해석기.
///
/// `{"e":"test_report","i":...,"s":...,"S":...,"X":...}` 형태만 이해하며
/// 시세 조회를 하지 않습니다.
pub struct MockTranslator;

#[async_trait]
impl MessageTranslator for MockTranslator {
    async fn translate(
        &self,
        ctx: &TranslationContext,
        frame: &Value,
    ) -> Option<CanonicalOrderUpdate> {
        if frame["e"].as_str() != Some("test_report") {
            return None;
        }

        let status = OrderStatus::from_venue(frame["X"].as_str()?)?;
        let side = OrderSide::from_str(frame["S"].as_str()?).ok()?;

        Some(CanonicalOrderUpdate {
            user_id: ctx.user_id,
            order_id: Uuid::nil(),
            external_order_id: frame["i"].as_i64().map(|i| i.to_string()),
            symbol: frame["s"].as_str().unwrap_or_default().to_string(),
            side,
            status,
            exchange: ctx.exchange,
            trading_mode: ctx.trading_mode,
            price: Decimal::ZERO,
            filled_price: Decimal::ZERO,
            filled_quantity: Decimal::ZERO,
            current_price: Decimal::ZERO,
            update_time: Utc::now(),
            position: None,
        })
    }
}

pub struct MockTranslatorFactory;

impl TranslatorFactory for MockTranslatorFactory {
    fn translator(&self, _exchange: Exchange) -> ExchangeResult<Arc<dyn MessageTranslator>> {
        Ok(Arc::new(MockTranslator))
    }
}

// ==================== 저장소 ====================

/// 인메모리 주문 저장소. Postgres 구현과 같은 조건부 쓰기 규칙을 따릅니다.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, OrderRecord>>,
}

impl MemoryOrderStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, order: OrderRecord) {
        self.orders.lock().await.insert(order.id, order);
    }

    pub async fn get(&self, id: Uuid) -> Option<OrderRecord> {
        self.orders.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn load_candidates(&self) -> Result<Vec<OrderRecord>, HubError> {
        let orders = self.orders.lock().await;
        let mut candidates: Vec<OrderRecord> = orders
            .values()
            .filter(|o| match o.trading_mode {
                TradingMode::Futures => !o.status.is_terminal(TradingMode::Futures),
                TradingMode::Spot => matches!(
                    o.status,
                    OrderStatus::Pending | OrderStatus::New | OrderStatus::PartiallyFilled
                ),
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|o| o.created_at);
        Ok(candidates)
    }

    async fn apply_stream_update(
        &self,
        key: &ConnectionKey,
        update: &CanonicalOrderUpdate,
    ) -> Result<Option<OrderRecord>, HubError> {
        let Some(external_id) = update.external_order_id.as_deref() else {
            return Ok(None);
        };

        let mut orders = self.orders.lock().await;
        let record = orders.values_mut().find(|o| {
            o.credential_id == key.credential_id
                && o.external_order_id.as_deref() == Some(external_id)
        });

        let Some(record) = record else {
            return Ok(None);
        };
        if !record
            .status
            .accepts_transition_to(update.status, record.trading_mode)
        {
            return Ok(None);
        }

        record.status = update.status;
        record.filled_quantity = update.filled_quantity;
        record.filled_price = update.filled_price;
        record.current_price = update.current_price;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn apply_status(
        &self,
        order: &OrderRecord,
        next: OrderStatus,
        filled_price: Decimal,
        filled_quantity: Decimal,
        current_price: Decimal,
    ) -> Result<bool, HubError> {
        let mut orders = self.orders.lock().await;
        let Some(record) = orders.get_mut(&order.id) else {
            return Ok(false);
        };
        if record.status.is_terminal(record.trading_mode) {
            return Ok(false);
        }

        record.status = next;
        record.filled_price = filled_price;
        record.filled_quantity = filled_quantity;
        record.current_price = current_price;
        record.updated_at = Utc::now();
        Ok(true)
    }
}

// ==================== 자격증명 ====================

/// 항상 같은 자격증명을 내주되, 지정된 id는 복호화 실패를 흉내냅니다.
#[derive(Default)]
pub struct MockCredentialSource {
    failing: Mutex<Vec<Uuid>>,
    pub load_calls: AtomicUsize,
}

impl MockCredentialSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail_for(&self, credential_id: Uuid) {
        self.failing.lock().await.push(credential_id);
    }
}

#[async_trait]
impl CredentialSource for MockCredentialSource {
    async fn load(&self, credential_id: Uuid) -> Result<DecryptedCredentials, HubError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().await.contains(&credential_id) {
            return Err(HubError::Credential(CryptoError::DecryptFailed));
        }
        Ok(DecryptedCredentials {
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
        })
    }
}

// ==================== 게이트웨이 ====================

/// 대본 기반 mock 게이트웨이.
#[derive(Default)]
pub struct MockGateway {
    /// 거래소 주문번호 → 응답 (None이면 GatewayError)
    reports: Mutex<HashMap<String, Option<OrderStatusReport>>>,
    /// 심볼 → 포지션
    positions: Mutex<HashMap<String, PositionSnapshot>>,
    pub status_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_report(&self, external_id: &str, report: OrderStatusReport) {
        self.reports
            .lock()
            .await
            .insert(external_id.to_string(), Some(report));
    }

    pub async fn fail_report(&self, external_id: &str) {
        self.reports.lock().await.insert(external_id.to_string(), None);
    }

    pub async fn set_position(&self, snapshot: PositionSnapshot) {
        self.positions
            .lock()
            .await
            .insert(snapshot.symbol.clone(), snapshot);
    }

    pub async fn clear_position(&self, symbol: &str) {
        self.positions.lock().await.remove(symbol);
    }
}

#[async_trait]
impl OrderGateway for MockGateway {
    fn venue(&self) -> Exchange {
        Exchange::Binance
    }

    async fn check_order_status(
        &self,
        _mode: TradingMode,
        _symbol: &str,
        external_order_id: &str,
        _algo_order_id: Option<&str>,
    ) -> ExchangeResult<OrderStatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.reports.lock().await.get(external_order_id) {
            Some(Some(report)) => Ok(report.clone()),
            Some(None) => Err(ExchangeError::Api("mock 게이트웨이 실패".to_string())),
            None => Err(ExchangeError::Api(format!(
                "대본에 없는 주문: {}",
                external_order_id
            ))),
        }
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>> {
        Ok(self.positions.lock().await.get(symbol).cloned())
    }
}

pub struct MockGatewayFactory {
    gateway: Arc<MockGateway>,
}

impl MockGatewayFactory {
    pub fn new(gateway: Arc<MockGateway>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

impl GatewayFactory for MockGatewayFactory {
    fn create(
        &self,
        _exchange: Exchange,
        _api_key: &str,
        _api_secret: &str,
    ) -> ExchangeResult<Arc<dyn OrderGateway>> {
        Ok(Arc::clone(&self.gateway) as Arc<dyn OrderGateway>)
    }
}

// ==================== 주문/리포트 생성 도우미 ====================

pub fn order(
    trading_mode: TradingMode,
    status: OrderStatus,
    external_order_id: Option<&str>,
) -> OrderRecord {
    OrderRecord {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        credential_id: Uuid::new_v4(),
        exchange: Exchange::Binance,
        symbol: "BTCUSDT".to_string(),
        external_order_id: external_order_id.map(|s| s.to_string()),
        algo_order_id: None,
        side: OrderSide::Buy,
        trading_mode,
        leverage: (trading_mode == TradingMode::Futures).then_some(10),
        quantity: Decimal::ONE,
        filled_quantity: Decimal::ZERO,
        price: Decimal::from(42000),
        filled_price: Decimal::ZERO,
        current_price: Decimal::ZERO,
        status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn report(status: OrderStatus, is_running: bool) -> OrderStatusReport {
    OrderStatusReport {
        status,
        executed_qty: Decimal::ZERO,
        orig_qty: Decimal::ONE,
        avg_fill_price: Decimal::ZERO,
        is_running,
        running_kind: if is_running {
            RunningKind::Normal
        } else {
            RunningKind::None
        },
    }
}

pub fn position(symbol: &str, amt: Decimal) -> PositionSnapshot {
    PositionSnapshot {
        symbol: symbol.to_string(),
        position_amt: amt,
        position_side: "LONG".to_string(),
        entry_price: Decimal::from(3000),
        mark_price: Decimal::from(3100),
        liquidation_price: Decimal::from(2500),
        unrealized_profit: Decimal::from(30),
        pnl_percent: Decimal::from(33),
        leverage: 10,
        margin_type: "isolated".to_string(),
        isolated_margin: Decimal::from(90),
    }
}
