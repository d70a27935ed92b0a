//! 주기적 정합성 점검.
//!
//! 스트림이 놓친 상태 변화를 REST 폴링으로 보정합니다. 틱마다 후보 주문을
//! 로드하고, 자격증명당 한 번만 복호화하며, 주문별 실패는 격리됩니다:
//! 어떤 주문의 오류도 같은 틱의 다른 주문 처리를 막지 않습니다.
//!
//! 취소는 틱 사이에서만 확인합니다. 진행 중인 틱은 끝까지 수행됩니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ordersync_core::{
    CanonicalOrderUpdate, OrderRecord, OrderStatus, PositionSnapshot, TradingMode,
};
use ordersync_exchange::{
    GatewayFactory, MarketPriceFetcher, OrderGateway, OrderStatusReport,
};

use crate::credentials::CredentialSource;
use crate::hub::Hub;
use crate::store::OrderStore;
use crate::HubError;

/// 정합성 점검 설정.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// 틱 간격
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// 환경변수 기반 구성 (`ORDER_MONITOR_INTERVAL_SECS`).
    pub fn from_env() -> Self {
        let interval = std::env::var("ORDER_MONITOR_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Self::default().interval);

        Self { interval }
    }
}

/// 틱당 카운터.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// 점검한 주문 수
    pub checked: u64,
    /// status가 전이되어 영속화된 주문 수
    pub updated: u64,
    /// 거래소 주문번호가 없어 건너뛴 주문 수
    pub skipped: u64,
    /// 격리된 실패 수 (복호화/게이트웨이/저장소)
    pub errors: u64,
}

impl ReconcileStats {
    /// 틱 요약 로그. 변화가 전혀 없는 틱은 debug로 낮춥니다.
    pub fn log_summary(&self) {
        if self.updated == 0 && self.errors == 0 {
            debug!(
                checked = self.checked,
                skipped = self.skipped,
                "정합성 점검 완료 (변화 없음)"
            );
        } else {
            info!(
                checked = self.checked,
                updated = self.updated,
                skipped = self.skipped,
                errors = self.errors,
                "정합성 점검 완료"
            );
        }
    }
}

/// 주문 정합성 점검기.
pub struct OrderMonitor {
    hub: Arc<Hub>,
    store: Arc<dyn OrderStore>,
    credentials: Arc<dyn CredentialSource>,
    gateways: Arc<dyn GatewayFactory>,
    price: Arc<MarketPriceFetcher>,
    config: MonitorConfig,
}

impl OrderMonitor {
    pub fn new(
        hub: Arc<Hub>,
        store: Arc<dyn OrderStore>,
        credentials: Arc<dyn CredentialSource>,
        gateways: Arc<dyn GatewayFactory>,
        price: Arc<MarketPriceFetcher>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            hub,
            store,
            credentials,
            gateways,
            price,
            config,
        }
    }

    /// 점검 루프. 취소될 때까지 고정 간격으로 틱을 수행합니다.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval = ?self.config.interval, "주문 정합성 점검 시작");

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("주문 정합성 점검 종료");
                    return;
                }
                _ = interval.tick() => {
                    let stats = self.run_tick().await;
                    stats.log_summary();
                }
            }
        }
    }

    /// 한 틱 수행. 실패는 카운터로 흡수되며 틱을 중단시키지 않습니다.
    pub async fn run_tick(&self) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        let orders = match self.store.load_candidates().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "후보 주문 로드 실패");
                stats.errors += 1;
                return stats;
            }
        };

        // 자격증명당 복호화/게이트웨이 생성은 틱 내 한 번. 실패도 캐시해
        // 같은 자격증명의 주문들이 반복 복호화를 시도하지 않게 합니다.
        let mut gateways: HashMap<Uuid, Option<Arc<dyn OrderGateway>>> = HashMap::new();

        for order in &orders {
            stats.checked += 1;

            // 거래소 접수 전이면 점검할 대상이 없음
            let Some(external_id) = order.external_order_id.as_deref() else {
                stats.skipped += 1;
                continue;
            };

            let gateway = match gateways.get(&order.credential_id) {
                Some(Some(gateway)) => Arc::clone(gateway),
                Some(None) => {
                    stats.errors += 1;
                    continue;
                }
                None => match self.build_gateway(order).await {
                    Ok(gateway) => {
                        gateways.insert(order.credential_id, Some(Arc::clone(&gateway)));
                        gateway
                    }
                    Err(e) => {
                        warn!(order_id = %order.id, error = %e, "게이트웨이 준비 실패, 주문 건너뜀");
                        gateways.insert(order.credential_id, None);
                        stats.errors += 1;
                        continue;
                    }
                },
            };

            let report = match gateway
                .check_order_status(
                    order.trading_mode,
                    &order.symbol,
                    external_id,
                    order.algo_order_id.as_deref(),
                )
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "주문 상태 조회 실패, 주문 건너뜀");
                    stats.errors += 1;
                    continue;
                }
            };

            match order.trading_mode {
                TradingMode::Futures => {
                    self.reconcile_futures(order, report, &gateway, &mut stats)
                        .await;
                }
                TradingMode::Spot => {
                    self.reconcile_spot(order, report, &mut stats).await;
                }
            }
        }

        stats
    }

    async fn build_gateway(&self, order: &OrderRecord) -> Result<Arc<dyn OrderGateway>, HubError> {
        let creds = self.credentials.load(order.credential_id).await?;
        Ok(self
            .gateways
            .create(order.exchange, &creds.api_key, &creds.api_secret)?)
    }

    /// 선물 점검.
    ///
    /// running(주문/조건부/포지션 중 하나라도 생존)이면 status는 건드리지
    /// 않고 포지션 갱신 업데이트만 전달합니다. 모두 종료됐을 때만 전이합니다.
    async fn reconcile_futures(
        &self,
        order: &OrderRecord,
        report: OrderStatusReport,
        gateway: &Arc<dyn OrderGateway>,
        stats: &mut ReconcileStats,
    ) {
        let position = match gateway.get_position(&order.symbol).await {
            Ok(position) => position,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "포지션 조회 실패, 주문 건너뜀");
                stats.errors += 1;
                return;
            }
        };

        let running = report.is_running
            || position.as_ref().is_some_and(PositionSnapshot::is_open);

        if running {
            // PnL/마크 가격 표시가 최신을 유지하도록 포지션만 실어 보냄.
            // 영속 상태는 변경하지 않음.
            if let Some(position) = position.filter(PositionSnapshot::is_open) {
                let current_price = position.mark_price;
                let update = Self::make_update(
                    order,
                    order.status,
                    report.avg_fill_price,
                    report.executed_qty,
                    current_price,
                )
                .with_position(position);
                self.hub.broadcast_to_user(order.user_id, &update).await;
            }
            return;
        }

        // 체결 없이 취소/거부로 끝난 주문은 closed가 아니라 failed
        let next = if report.status == OrderStatus::Failed && report.executed_qty.is_zero() {
            OrderStatus::Failed
        } else {
            OrderStatus::Closed
        };
        if !order.status.accepts_transition_to(next, order.trading_mode) {
            return;
        }

        self.persist_and_broadcast(order, next, &report, stats).await;
    }

    /// 현물 점검. 거래소가 보고한 status가 곧 목표 상태입니다.
    async fn reconcile_spot(
        &self,
        order: &OrderRecord,
        report: OrderStatusReport,
        stats: &mut ReconcileStats,
    ) {
        let next = report.status;
        if next == order.status {
            return;
        }
        if !order.status.accepts_transition_to(next, TradingMode::Spot) {
            debug!(order_id = %order.id, current = %order.status, next = %next, "역방향 전이 거부");
            return;
        }

        self.persist_and_broadcast(order, next, &report, stats).await;
    }

    async fn persist_and_broadcast(
        &self,
        order: &OrderRecord,
        next: OrderStatus,
        report: &OrderStatusReport,
        stats: &mut ReconcileStats,
    ) {
        let current_price = self
            .price
            .current_price(&order.symbol, order.trading_mode)
            .await;

        match self
            .store
            .apply_status(
                order,
                next,
                report.avg_fill_price,
                report.executed_qty,
                current_price,
            )
            .await
        {
            Ok(true) => {
                stats.updated += 1;
                info!(order_id = %order.id, from = %order.status, to = %next, "주문 상태 전이");
                let update = Self::make_update(
                    order,
                    next,
                    report.avg_fill_price,
                    report.executed_qty,
                    current_price,
                );
                self.hub.broadcast_to_user(order.user_id, &update).await;
            }
            Ok(false) => {
                // 경쟁 쓰기(스트림 경로 등)가 먼저 종료 상태로 만든 경우
                debug!(order_id = %order.id, "이미 종료 상태, 전이 생략");
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "상태 영속화 실패");
                stats.errors += 1;
            }
        }
    }

    fn make_update(
        order: &OrderRecord,
        status: OrderStatus,
        filled_price: Decimal,
        filled_quantity: Decimal,
        current_price: Decimal,
    ) -> CanonicalOrderUpdate {
        CanonicalOrderUpdate {
            user_id: order.user_id,
            order_id: order.id,
            external_order_id: order.external_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            exchange: order.exchange,
            trading_mode: order.trading_mode,
            price: order.price,
            filled_price,
            filled_quantity,
            current_price,
            update_time: chrono::Utc::now(),
            position: None,
        }
    }
}
