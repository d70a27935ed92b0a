//! 브라우저 구독자용 WebSocket 엔드포인트.
//!
//! 접속 시 JWT를 검증하고 허브에 구독을 등록하며, 연결이 끊기면
//! 구독을 해제합니다. 재접속은 전적으로 클라이언트 몫입니다.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ordersync_core::{ConnectionKey, Exchange, TradingMode, WsEnvelope};
use ordersync_hub::StreamCredentials;

use crate::auth::authenticate;
use crate::state::AppState;

/// 구독자당 전달 큐 깊이. 가득 차면 이후 업데이트는 유실됩니다.
const DELIVERY_QUEUE_DEPTH: usize = 64;

#[derive(Deserialize)]
pub struct OrdersWsQuery {
    exchange: String,
    /// 생략 시 spot
    trading_mode: Option<String>,
    credential_id: Uuid,
    token: String,
}

/// `GET /ws/orders?exchange=binance&trading_mode=futures&credential_id=...&token=...`
pub async fn orders_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<OrdersWsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = match authenticate(&params.token, &state.jwt_secret) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!(error = %e, "WebSocket 인증 실패");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let exchange = match params.exchange.parse::<Exchange>() {
        Ok(exchange) => exchange,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let trading_mode = match params
        .trading_mode
        .as_deref()
        .unwrap_or("spot")
        .parse::<TradingMode>()
    {
        Ok(mode) => mode,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let key = ConnectionKey::new(exchange, trading_mode, params.credential_id);
    ws.on_upgrade(move |socket| handle_socket(state, socket, user_id, key))
}

async fn handle_socket(state: AppState, mut socket: WebSocket, user_id: Uuid, key: ConnectionKey) {
    // listen key 발급에 쓸 api 키 복호화
    let creds = match state.credentials.load(key.credential_id).await {
        Ok(creds) => StreamCredentials {
            api_key: creds.api_key,
        },
        Err(e) => {
            warn!(key = %key, error = %e, "자격증명 로드 실패, 접속 거부");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let subscriber_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<WsEnvelope>(DELIVERY_QUEUE_DEPTH);

    if let Err(e) = state
        .hub
        .subscribe(user_id, key, subscriber_id, tx, &creds)
        .await
    {
        warn!(key = %key, error = %e, "구독 실패");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!(user_id = %user_id, key = %key, subscriber_id = %subscriber_id, "구독자 접속");

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(envelope) = update else { break };
                match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "페이로드 직렬화 실패"),
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // 클라이언트발 텍스트/핑은 무시 (프로토콜 수준 pong은 자동)
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "클라이언트 소켓 오류");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(user_id, key, subscriber_id).await;
    info!(subscriber_id = %subscriber_id, "구독자 해제");
}
