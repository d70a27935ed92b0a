//! JWT 검증.
//!
//! 토큰 발급은 별도 인증 서비스의 몫이고 여기서는 검증만 합니다.
//! `sub` 클레임이 사용자 UUID입니다.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("토큰이 유효하지 않습니다: {0}")]
    InvalidToken(String),

    #[error("sub 클레임이 UUID가 아닙니다: {0}")]
    InvalidSubject(String),
}

#[derive(Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// 토큰을 검증하고 사용자 id를 반환합니다.
pub fn authenticate(token: &str, secret: &str) -> Result<Uuid, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    data.claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| AuthError::InvalidSubject(data.claims.sub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn token(sub: &str, secret: &str) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp: (chrono_now() + 3600) as usize,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn chrono_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn valid_token_yields_user_id() {
        let user_id = Uuid::new_v4();
        let token = token(&user_id.to_string(), "secret");
        assert_eq!(authenticate(&token, "secret").unwrap(), user_id);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = token(&Uuid::new_v4().to_string(), "secret");
        assert!(matches!(
            authenticate(&token, "other"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn non_uuid_subject_rejected() {
        let token = token("alice", "secret");
        assert!(matches!(
            authenticate(&token, "secret"),
            Err(AuthError::InvalidSubject(_))
        ));
    }
}
