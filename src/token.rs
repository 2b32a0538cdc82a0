//! Manage json web tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_AUDIENCE: &str = "greeneye.app";
const EXPIRATION_HOURS: i64 = 24;

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: i64,
    /// Identifies the time at which the JWT was issued.
    pub iat: i64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
    /// Account username.
    pub username: String,
    /// Account email.
    pub email: String,
    /// One entry per role held by the account.
    pub roles: Vec<String>,
}

/// Manage JWT tokens signed with a shared secret.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    pub fn new(issuer: &str, secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Create a new access token. Returns the token and its expiry instant.
    pub fn create(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
        roles: &[String],
    ) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(EXPIRATION_HOURS);
        let header = Header::new(self.algorithm);
        let claims = Claims {
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            sub: user_id.to_owned(),
            username: username.to_owned(),
            email: email.to_owned(),
            roles: roles.to_vec(),
        };

        let token = encode(&header, &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}
