//! 저장된 거래소 API 자격증명 로딩과 복호화.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use ordersync_core::CredentialVault;

use crate::HubError;

/// 스트림 접속(listen key 발급)에 필요한 자격증명.
///
/// 구독 요청을 받는 전송 계층이 복호화해서 전달합니다.
#[derive(Clone)]
pub struct StreamCredentials {
    pub api_key: String,
}

/// 서명 REST 호출에 필요한 자격증명 쌍.
#[derive(Clone)]
pub struct DecryptedCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// 자격증명 로딩 seam.
///
/// 복호화 실패는 정상적인 운영 상황입니다. 호출자는 해당 주문만
/// 건너뛰고 다음 틱에 재시도합니다.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self, credential_id: Uuid) -> Result<DecryptedCredentials, HubError>;
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    api_key_enc: Vec<u8>,
    api_key_nonce: Vec<u8>,
    api_secret_enc: Vec<u8>,
    api_secret_nonce: Vec<u8>,
}

/// Postgres 자격증명 저장소.
///
/// 컬럼은 `(ciphertext, nonce)` 쌍으로 저장되며 AES-256-GCM으로 복호화합니다.
pub struct PgCredentialSource {
    pool: PgPool,
    vault: Arc<CredentialVault>,
}

impl PgCredentialSource {
    pub fn new(pool: PgPool, vault: Arc<CredentialVault>) -> Self {
        Self { pool, vault }
    }
}

#[async_trait]
impl CredentialSource for PgCredentialSource {
    async fn load(&self, credential_id: Uuid) -> Result<DecryptedCredentials, HubError> {
        let row: CredentialRow = sqlx::query_as(
            r#"
            SELECT api_key_enc, api_key_nonce, api_secret_enc, api_secret_nonce
            FROM exchange_credentials
            WHERE id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::Row(format!("자격증명 없음: {}", credential_id)))?;

        let api_key = self
            .vault
            .decrypt_string(&row.api_key_enc, &row.api_key_nonce)?;
        let api_secret = self
            .vault
            .decrypt_string(&row.api_secret_enc, &row.api_secret_nonce)?;

        Ok(DecryptedCredentials {
            api_key,
            api_secret,
        })
    }
}
