//! 주문 동기화 코어.
//!
//! 브라우저 구독자 다수를 소수의 업스트림 거래소 스트림으로 다중화하는
//! [`Hub`]와, 스트림이 놓친 변경을 REST 폴링으로 보정하는
//! [`OrderMonitor`]로 구성됩니다. 두 경로 모두 동일한 정규화 업데이트와
//! 브로드캐스트 경로로 수렴하며, 영속화된 주문 status가 단일 진실
//! 공급원입니다.

pub mod credentials;
pub mod hub;
pub mod monitor;
pub mod session;
pub mod store;

use thiserror::Error;

use ordersync_core::CryptoError;
use ordersync_exchange::ExchangeError;

/// 동기화 코어 에러.
///
/// `Dial`만이 호출자(subscribe)에게 동기적으로 전파됩니다.
/// 나머지는 발생 지점에서 격리되어 로그/카운터로 흡수됩니다.
#[derive(Debug, Error)]
pub enum HubError {
    /// 업스트림 스트림 접속 실패. subscribe가 실패하며 상태가 남지 않습니다.
    #[error("업스트림 접속 실패: {0}")]
    Dial(String),

    /// 업스트림 스트림 읽기 실패. 세션이 해체됩니다.
    #[error("업스트림 읽기 실패: {0}")]
    Read(String),

    /// 저장소 오류
    #[error("저장소 오류: {0}")]
    Store(#[from] sqlx::Error),

    /// 저장 행의 도메인 변환 실패 (손상된 enum 컬럼 등)
    #[error("저장 행 해석 실패: {0}")]
    Row(String),

    /// 자격증명 복호화 실패. 해당 주문만 이번 틱에서 건너뜁니다.
    #[error("자격증명 오류: {0}")]
    Credential(#[from] CryptoError),

    /// 거래소 호출 실패. 해당 주문만 이번 틱에서 건너뜁니다.
    #[error("거래소 오류: {0}")]
    Exchange(#[from] ExchangeError),
}

pub use credentials::{CredentialSource, PgCredentialSource, StreamCredentials};
pub use hub::Hub;
pub use monitor::{MonitorConfig, OrderMonitor, ReconcileStats};
pub use session::{
    AdapterFactory, FrameStream, LiveAdapterFactory, LiveTranslatorFactory, StreamConnector,
    TranslatorFactory, WsConnector,
};
pub use store::{OrderStore, PgOrderStore};
