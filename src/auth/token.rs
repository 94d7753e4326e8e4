//! Session tokens: a signed, self-contained blob carrying its own claims.
//! There is no server-side session table — revocation happens by rotating
//! `TOKEN_SIGNING_KEY`, which invalidates every outstanding token at once.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token kind mismatch: expected {expected:?}, got {actual:?}")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
}

pub struct TokenSigner {
    key: Vec<u8>,
}

const ACCESS_TTL_SECS: i64 = 15 * 60;
const REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

impl TokenSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub fn issue(&self, subject: &str, kind: TokenKind, now: DateTime<Utc>) -> String {
        let ttl = match kind {
            TokenKind::Access => ACCESS_TTL_SECS,
            TokenKind::Refresh => REFRESH_TTL_SECS,
        };
        let claims = Claims {
            sub: subject.to_string(),
            kind,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl,
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> String {
        let payload = serde_json::to_vec(claims).expect("claims always serialize");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload_b64.as_bytes());
        let signature = mac.finalize().into_bytes();
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature);

        format!("{payload_b64}.{sig_b64}")
    }

    pub fn verify(&self, token: &str, expected_kind: TokenKind, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload_b64.as_bytes());
        let expected_sig = mac.finalize().into_bytes();

        let provided_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;

        // constant-time compare via subtle-equivalent: hmac's own verify_slice
        let mut verify_mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        verify_mac.update(payload_b64.as_bytes());
        verify_mac
            .verify_slice(&provided_sig)
            .map_err(|_| TokenError::BadSignature)?;
        let _ = expected_sig;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if claims.kind != expected_kind {
            return Err(TokenError::WrongKind {
                expected: expected_kind,
                actual: claims.kind,
            });
        }
        if claims.exp < now.timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-signing-key-0123456789".to_vec())
    }

    #[test]
    fn issues_and_verifies_an_access_token() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue("admin", TokenKind::Access, now);
        let claims = signer.verify(&token, TokenKind::Access, now).unwrap();
        assert_eq!(claims.sub, "admin");
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue("admin", TokenKind::Access, now);
        let (payload, sig) = token.split_once('.').unwrap();
        let tampered = format!("{payload}x.{sig}");
        assert!(matches!(
            signer.verify(&tampered, TokenKind::Access, now),
            Err(TokenError::Malformed) | Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn rejects_an_expired_token() {
        let signer = signer();
        let issued_at = Utc::now() - chrono::Duration::days(30);
        let token = signer.issue("admin", TokenKind::Refresh, issued_at);
        let err = signer.verify(&token, TokenKind::Refresh, Utc::now()).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn rejects_wrong_token_kind() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue("admin", TokenKind::Refresh, now);
        let err = signer.verify(&token, TokenKind::Access, now).unwrap_err();
        assert!(matches!(err, TokenError::WrongKind { .. }));
    }
}
