//! 주문 동기화 WebSocket 서버.
//!
//! 브라우저 구독자를 받아 허브에 연결하고, 백그라운드에서 주문 정합성
//! 점검을 돌립니다. Ctrl+C / SIGTERM 수신 시 종료 토큰을 통해 세션과
//! 점검 루프를 정리한 뒤 내려갑니다.

mod auth;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use ordersync_core::CredentialVault;
use ordersync_exchange::{BinanceEndpoints, LiveGatewayFactory, MarketPriceFetcher};
use ordersync_hub::{
    CredentialSource, Hub, LiveAdapterFactory, LiveTranslatorFactory, MonitorConfig, OrderMonitor,
    OrderStore, PgCredentialSource, PgOrderStore, WsConnector,
};

use state::AppState;

/// 서버 설정.
struct ServerConfig {
    host: String,
    port: u16,
}

impl ServerConfig {
    /// 환경변수에서 로드 (`API_HOST`, `API_PORT`).
    fn from_env() -> Self {
        let host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("API_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self { host, port }
    }

    fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ordersync_api=info,ordersync_hub=info,ordersync_exchange=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    info!("주문 동기화 서버 시작");

    let config = ServerConfig::from_env();
    let addr = config
        .socket_addr()
        .context("API_HOST/API_PORT가 유효한 소켓 주소가 아닙니다")?;

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL 환경변수가 필요합니다")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("데이터베이스 연결 실패")?;
    info!("데이터베이스 연결 완료");

    let master_key = std::env::var("ENCRYPTION_MASTER_KEY")
        .context("ENCRYPTION_MASTER_KEY 환경변수가 필요합니다")?;
    let vault = Arc::new(CredentialVault::new(&master_key)?);

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        warn!("JWT_SECRET 미설정, 개발용 기본값 사용 (프로덕션 금지)");
        "dev-secret-key-change-in-production".to_string()
    });

    // 거래소 경계 구성
    let endpoints = BinanceEndpoints::from_env();
    let price = Arc::new(MarketPriceFetcher::new(endpoints.clone())?);
    let store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
    let credentials: Arc<dyn CredentialSource> = Arc::new(PgCredentialSource::new(pool.clone(), vault));

    let hub = Hub::new(
        Arc::new(WsConnector),
        Arc::new(LiveAdapterFactory),
        Arc::new(LiveTranslatorFactory::new(Arc::clone(&price))),
        Arc::clone(&store),
    );

    let shutdown = CancellationToken::new();

    // 정합성 점검 시작
    let monitor_config = MonitorConfig::from_env();
    info!(interval = ?monitor_config.interval, "정합성 점검 설정");
    let monitor = OrderMonitor::new(
        Arc::clone(&hub),
        Arc::clone(&store),
        Arc::clone(&credentials),
        Arc::new(LiveGatewayFactory::new(endpoints)),
        price,
        monitor_config,
    );
    let monitor_shutdown = shutdown.clone();
    tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let app_state = AppState {
        hub,
        credentials,
        jwt_secret,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws/orders", get(ws::orders_ws))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(%addr, "서버 대기 중");
    info!("WebSocket: ws://{}/ws/orders", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // 세션/점검 루프에 종료 전파
    shutdown.cancel();
    info!("서버 정상 종료");

    Ok(())
}

/// Ctrl+C 또는 SIGTERM 대기 후 종료 토큰 취소.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => futures::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("종료 시그널 수신");
    token.cancel();
}
