//! API 자격증명 암복호화 (AES-256-GCM).
//!
//! DB에는 `(ciphertext, nonce)` 쌍으로 저장되며, 마스터 키는 환경변수로
//! 주입됩니다. 복호화 실패는 정상적인 운영 상황(키 교체, 손상된 행)으로
//! 취급하고 호출자가 해당 항목만 건너뛰도록 에러를 반환합니다.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 암복호화 에러.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// 마스터 키가 비어 있거나 키 스케줄 생성 실패
    #[error("마스터 키가 유효하지 않습니다: {0}")]
    InvalidKey(String),

    /// nonce 길이 불일치 (12바이트 고정)
    #[error("nonce 길이가 유효하지 않습니다: {0}바이트")]
    InvalidNonce(usize),

    /// 암호화 실패
    #[error("암호화 실패")]
    EncryptFailed,

    /// 복호화 실패 (키 불일치 또는 데이터 손상)
    #[error("복호화 실패")]
    DecryptFailed,

    /// 복호화된 평문의 역직렬화 실패
    #[error("자격증명 역직렬화 실패: {0}")]
    Deserialize(String),
}

/// AES-256-GCM nonce 길이 (바이트).
const NONCE_LEN: usize = 12;

/// 자격증명 금고.
///
/// 마스터 키 문자열의 SHA-256 해시를 AES-256 키로 사용합니다.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// 마스터 키로 금고 생성.
    pub fn new(master_key: &str) -> Result<Self, CryptoError> {
        if master_key.is_empty() {
            return Err(CryptoError::InvalidKey("빈 마스터 키".to_string()));
        }

        let key = Sha256::digest(master_key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// 평문 암호화. `(ciphertext, nonce)`를 반환합니다.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok((ciphertext, nonce.to_vec()))
    }

    /// 암호문 복호화.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::InvalidNonce(nonce.len()));
        }

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// 복호화 후 UTF-8 문자열로 변환.
    pub fn decrypt_string(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(ciphertext, nonce)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Deserialize(e.to_string()))
    }

    /// 복호화 후 JSON 역직렬화.
    pub fn decrypt_json<T: serde::de::DeserializeOwned>(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<T, CryptoError> {
        let plaintext = self.decrypt(ciphertext, nonce)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Deserialize(e.to_string()))
    }
}
