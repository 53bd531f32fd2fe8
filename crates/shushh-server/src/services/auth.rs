//! Credential verification
//!
//! Identities are carried in HS256 JWTs issued elsewhere; the relay only
//! checks the signature and expiry and trusts the `sub` claim.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shushh_types::{UserId, CLOSE_INVALID_CREDENTIAL, CLOSE_NO_CREDENTIAL};
use thiserror::Error;

const TOKEN_TYPE_ACCESS: &str = "access";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no credential supplied")]
    MissingCredential,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

impl AuthError {
    /// WebSocket close code reported to the client
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::MissingCredential => CLOSE_NO_CREDENTIAL,
            AuthError::InvalidCredential(_) => CLOSE_INVALID_CREDENTIAL,
        }
    }
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    /// Verify `token` and return the identity it names
    pub fn validate_token(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;

        let claims = token_data.claims;
        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(AuthError::InvalidCredential(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidCredential("empty subject".to_string()));
        }
        Ok(claims.sub)
    }

    /// Mint an access token for `user_id`, valid for `ttl`
    pub fn issue_token(&self, user_id: &str, ttl: Duration) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // user_id
    exp: i64,    // expiration time
    iat: i64,    // issued at
    token_type: String,
}
