//! 구독자 레지스트리와 거래소 세션 수명주기.
//!
//! 연결 키 테이블과 사용자-구독자 인덱스는 하나의 `Mutex` 아래에서만
//! 변경됩니다. 새 세션의 dial은 잠금을 쥔 채 수행해 동시 subscribe가
//! 같은 키로 중복 접속하는 것을 원천 차단합니다 (레지스트리 연산 중
//! 유일하게 대기가 허용되는 지점).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ordersync_core::{CanonicalOrderUpdate, ConnectionKey, TradingMode, WsEnvelope};
use ordersync_exchange::{MessageTranslator, TranslationContext, VenueAdapter};

use crate::credentials::StreamCredentials;
use crate::session::{AdapterFactory, FrameStream, StreamConnector, TranslatorFactory};
use crate::store::OrderStore;
use crate::HubError;

/// listen key 연장 주기. Binance 키는 60분 만료이므로 절반 주기로 연장합니다.
const LISTEN_KEY_KEEP_ALIVE: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    cancel: CancellationToken,
    /// subscriber id → 소유 사용자
    subscribers: HashMap<Uuid, Uuid>,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<ConnectionKey, SessionEntry>,
    /// user id → (subscriber id → 전달 채널)
    user_index: HashMap<Uuid, HashMap<Uuid, mpsc::Sender<WsEnvelope>>>,
}

impl HubState {
    fn remove_from_user_index(&mut self, user_id: Uuid, subscriber_id: Uuid) {
        if let Some(subs) = self.user_index.get_mut(&user_id) {
            subs.remove(&subscriber_id);
            if subs.is_empty() {
                self.user_index.remove(&user_id);
            }
        }
    }
}

/// 구독자 레지스트리.
///
/// 전역 싱글톤이 아니라 시작 시점에 전송 계층과 모니터에 주입되는
/// 명시적 인스턴스입니다.
pub struct Hub {
    state: Mutex<HubState>,
    connector: Arc<dyn StreamConnector>,
    adapters: Arc<dyn AdapterFactory>,
    translators: Arc<dyn TranslatorFactory>,
    store: Arc<dyn OrderStore>,
}

impl Hub {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        adapters: Arc<dyn AdapterFactory>,
        translators: Arc<dyn TranslatorFactory>,
        store: Arc<dyn OrderStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            connector,
            adapters,
            translators,
            store,
        })
    }

    /// 구독 등록. subscriber id 기준으로 멱등합니다.
    ///
    /// 키에 세션이 없으면 listen key 발급 후 스트림을 dial합니다.
    /// dial 실패 시 에러를 반환하며 세션/구독자 상태가 일절 남지 않습니다.
    pub async fn subscribe(
        self: &Arc<Self>,
        user_id: Uuid,
        key: ConnectionKey,
        subscriber_id: Uuid,
        delivery: mpsc::Sender<WsEnvelope>,
        credentials: &StreamCredentials,
    ) -> Result<(), HubError> {
        let mut state = self.state.lock().await;

        if !state.sessions.contains_key(&key) {
            let adapter = self
                .adapters
                .adapter(key.exchange)
                .map_err(|e| HubError::Dial(e.to_string()))?;
            let translator = self
                .translators
                .translator(key.exchange)
                .map_err(|e| HubError::Dial(e.to_string()))?;

            let listen_key = adapter
                .create_listen_key(&credentials.api_key, key.trading_mode)
                .await
                .map_err(|e| HubError::Dial(e.to_string()))?;
            let url = adapter.ws_url(key.trading_mode, &listen_key);
            let stream = self.connector.connect(&url).await?;

            let cancel = CancellationToken::new();
            state.sessions.insert(
                key,
                SessionEntry {
                    cancel: cancel.clone(),
                    subscribers: HashMap::new(),
                },
            );

            let ctx = TranslationContext {
                user_id,
                exchange: key.exchange,
                trading_mode: key.trading_mode,
            };
            tokio::spawn(Self::read_loop(
                Arc::clone(self),
                key,
                ctx,
                stream,
                translator,
                cancel.clone(),
            ));
            tokio::spawn(Self::keep_alive_loop(
                adapter,
                credentials.api_key.clone(),
                listen_key,
                key.trading_mode,
                cancel,
            ));

            info!(key = %key, "새 거래소 세션 생성");
        }

        if let Some(entry) = state.sessions.get_mut(&key) {
            entry.subscribers.insert(subscriber_id, user_id);
        }
        state
            .user_index
            .entry(user_id)
            .or_default()
            .insert(subscriber_id, delivery);

        debug!(key = %key, subscriber_id = %subscriber_id, "구독 등록");
        Ok(())
    }

    /// 구독 해제. 두 번 불러도 두 번째는 no-op입니다.
    ///
    /// 세션의 마지막 구독자가 떠나면 세션을 해체하고 레지스트리에서
    /// 제거합니다. 구독자 0인 세션은 잠금 해제 시점에 존재하지 않습니다.
    pub async fn unsubscribe(&self, user_id: Uuid, key: ConnectionKey, subscriber_id: Uuid) {
        let mut state = self.state.lock().await;

        state.remove_from_user_index(user_id, subscriber_id);

        let emptied = match state.sessions.get_mut(&key) {
            Some(entry) => {
                entry.subscribers.remove(&subscriber_id);
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some(entry) = state.sessions.remove(&key) {
                entry.cancel.cancel();
                info!(key = %key, "마지막 구독자 해제, 세션 종료");
            }
        }
    }

    /// 사용자의 모든 구독자에게 업데이트 전달.
    ///
    /// 어느 세션이 이벤트를 만들었는지와 무관하게 동일한 경로입니다.
    /// 전달은 best-effort이며 재시도하지 않습니다: 채널이 가득 찬(느린)
    /// 구독자는 이번 업데이트를 잃고, 다른 구독자 전달에는 영향이 없습니다.
    pub async fn broadcast_to_user(&self, user_id: Uuid, update: &CanonicalOrderUpdate) {
        let envelope = WsEnvelope::order_update(update);

        let senders: Vec<(Uuid, mpsc::Sender<WsEnvelope>)> = {
            let state = self.state.lock().await;
            match state.user_index.get(&user_id) {
                Some(subs) => subs.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };

        for (subscriber_id, tx) in senders {
            if let Err(e) = tx.try_send(envelope.clone()) {
                warn!(subscriber_id = %subscriber_id, error = %e, "구독자 전달 실패");
            }
        }
    }

    /// 읽기 오류/정상 종료로 죽은 세션 정리.
    ///
    /// 세션과 그 구독자 인덱스 항목을 제거합니다. 남은 구독자는 이후
    /// 업데이트를 받지 못하며, 재접속은 전송 계층의 새 subscribe가 담당합니다.
    async fn teardown_session(&self, key: &ConnectionKey) {
        let mut state = self.state.lock().await;

        let Some(entry) = state.sessions.remove(key) else {
            return;
        };
        entry.cancel.cancel();
        for (subscriber_id, user_id) in entry.subscribers {
            state.remove_from_user_index(user_id, subscriber_id);
        }

        warn!(key = %key, "세션 해체");
    }

    async fn handle_stream_update(&self, key: &ConnectionKey, update: CanonicalOrderUpdate) {
        match self.store.apply_stream_update(key, &update).await {
            Ok(Some(record)) => {
                let update = CanonicalOrderUpdate {
                    user_id: record.user_id,
                    order_id: record.id,
                    ..update
                };
                self.broadcast_to_user(record.user_id, &update).await;
            }
            Ok(None) => {
                debug!(key = %key, "매칭되는 주문 없음 또는 전이 거부, 업데이트 폐기");
            }
            Err(e) => warn!(key = %key, error = %e, "스트림 업데이트 반영 실패"),
        }
    }

    /// 세션 전용 읽기 루프.
    ///
    /// 오류 시 루프를 빠져나와 세션을 해체할 뿐, 스스로 재접속하지 않습니다.
    async fn read_loop(
        hub: Arc<Hub>,
        key: ConnectionKey,
        ctx: TranslationContext,
        mut stream: Box<dyn FrameStream>,
        translator: Arc<dyn MessageTranslator>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return,
                frame = stream.next_frame() => frame,
            };

            match frame {
                Ok(Some(value)) => {
                    if let Some(update) = translator.translate(&ctx, &value).await {
                        hub.handle_stream_update(&key, update).await;
                    }
                }
                Ok(None) => {
                    info!(key = %key, "업스트림 스트림 종료");
                    hub.teardown_session(&key).await;
                    return;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "업스트림 읽기 실패");
                    hub.teardown_session(&key).await;
                    return;
                }
            }
        }
    }

    /// listen key 연장 루프. 세션 취소 시 키를 폐기하고 종료합니다.
    async fn keep_alive_loop(
        adapter: Arc<dyn VenueAdapter>,
        api_key: String,
        listen_key: String,
        mode: TradingMode,
        cancel: CancellationToken,
    ) {
        let start = tokio::time::Instant::now() + LISTEN_KEY_KEEP_ALIVE;
        let mut interval = tokio::time::interval_at(start, LISTEN_KEY_KEEP_ALIVE);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = adapter.keep_alive_listen_key(&api_key, &listen_key, mode).await {
                        warn!(error = %e, "listen key 연장 실패");
                    }
                }
            }
        }

        if let Err(e) = adapter.close_listen_key(&api_key, &listen_key, mode).await {
            debug!(error = %e, "listen key 폐기 실패");
        }
    }

    /// 현재 라이브 세션 수.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// 키에 붙은 구독자 수. 세션이 없으면 0.
    pub async fn subscriber_count(&self, key: &ConnectionKey) -> usize {
        self.state
            .lock()
            .await
            .sessions
            .get(key)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// 사용자의 라이브 구독자 수.
    pub async fn user_subscriber_count(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .user_index
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
