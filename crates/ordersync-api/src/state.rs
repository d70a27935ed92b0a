//! 핸들러가 공유하는 애플리케이션 상태.

use std::sync::Arc;

use ordersync_hub::{CredentialSource, Hub};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub credentials: Arc<dyn CredentialSource>,
    pub jwt_secret: String,
}
