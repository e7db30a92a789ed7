//! Bearer tokens and password hashing.
//!
//! Tokens are HS256 JWTs carrying the caller's `userid`. The signing secret is
//! supplied by configuration.

use std::fmt;

use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::UserId;

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
pub const MIN_SECRET_LEN: usize = 32;

/// Authenticated caller, extracted from a verified bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userid: Option<UserId>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl Authenticator {
    pub fn new(secret: &[u8], token_ttl_secs: i64) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(LibError::invalid_with_code(
                "weak_secret",
                "Token signing secret is too short",
                anyhow!(
                    "signing secret has {} bytes, need at least {}",
                    secret.len(),
                    MIN_SECRET_LEN
                ),
            ));
        }
        if token_ttl_secs <= 0 {
            return Err(LibError::invalid(
                "Token lifetime must be positive",
                anyhow!("token ttl {} is not positive", token_ttl_secs),
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            token_ttl_secs,
        })
    }

    pub fn issue(&self, user_id: UserId) -> Result<String> {
        let now = Utc::now().timestamp();
        self.sign(&Claims {
            userid: Some(user_id),
            iat: now,
            exp: now + self.token_ttl_secs,
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(
            |err| LibError::unknown("Failed to issue authentication token", anyhow!(err)),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Identity> {
        let token = token.trim();
        if token.is_empty() {
            return Err(LibError::missing_token());
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| LibError::invalid_token(anyhow!(err)))?;

        match data.claims.userid {
            Some(user_id) => Ok(Identity { user_id }),
            None => Err(LibError::missing_identity()),
        }
    }

    /// Verifies the raw value of an `Authorization` header.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Identity> {
        let token = bearer_token(header)?;
        self.verify(token)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let Some(value) = header else {
        return Err(LibError::missing_token());
    };
    let Some((scheme, token)) = value.trim().split_once(' ') else {
        return Err(LibError::missing_token());
    };
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(LibError::missing_token());
    }
    Ok(token.trim())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| LibError::unknown("Failed to hash password", anyhow!(err.to_string())))
}

/// Constant-time check of `password` against a stored PHC hash string. A
/// malformed stored hash never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("graphboard-dummy-password").ok());

/// Burns the same work as a real verification so unknown accounts cannot be
/// told apart from wrong passwords by response time.
pub fn verify_against_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn authenticator() -> Authenticator {
        Authenticator::new(SECRET, DEFAULT_TOKEN_TTL_SECS).expect("valid authenticator")
    }

    #[test]
    fn issued_token_verifies_to_same_identity() {
        let auth = authenticator();
        let token = auth.issue(UserId(42)).expect("token");
        let identity = auth.verify(&token).expect("token should verify");
        assert_eq!(identity.user_id, UserId(42));
    }

    #[test]
    fn token_from_other_secret_is_invalid() {
        let other = Authenticator::new(b"ffffffffffffffffffffffffffffffff", 60).expect("valid");
        let token = other.issue(UserId(1)).expect("token");
        let err = authenticator().verify(&token).expect_err("foreign token");
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.code, "invalid_token");
    }

    #[test]
    fn expired_token_is_invalid() {
        let auth = authenticator();
        let now = Utc::now().timestamp();
        let token = auth
            .sign(&Claims {
                userid: Some(UserId(1)),
                iat: now - 7200,
                exp: now - 3600,
            })
            .expect("token");
        let err = auth.verify(&token).expect_err("expired token");
        assert_eq!(err.code, "invalid_token");
    }

    #[test]
    fn token_without_identity_is_rejected_distinctly() {
        let auth = authenticator();
        let now = Utc::now().timestamp();
        let token = auth
            .sign(&Claims {
                userid: None,
                iat: now,
                exp: now + 60,
            })
            .expect("token");
        let err = auth.verify(&token).expect_err("token without identity");
        assert_eq!(err.code, "missing_identity");
    }

    #[test]
    fn garbage_token_is_invalid() {
        let err = authenticator()
            .verify("not.a.token")
            .expect_err("garbage token");
        assert_eq!(err.code, "invalid_token");
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).expect("token"), "abc");
        assert_eq!(bearer_token(Some("bearer   abc ")).expect("token"), "abc");
        assert_eq!(
            bearer_token(None).expect_err("missing").code,
            "missing_token"
        );
        assert_eq!(
            bearer_token(Some("Basic abc")).expect_err("wrong scheme").code,
            "missing_token"
        );
        assert_eq!(
            bearer_token(Some("Bearer ")).expect_err("empty").code,
            "missing_token"
        );
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = Authenticator::new(b"short", 60).expect_err("short secret");
        assert_eq!(err.code, "weak_secret");
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").expect("hash");
        assert_ne!(hash, "correct horse");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "plaintext"));
    }
}
