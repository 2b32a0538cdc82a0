//! User accounts, roles and refresh tokens.

mod repository;

pub use repository::*;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Refresh token lifetime.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 3;

const REFRESH_TOKEN_BYTES: usize = 64;

/// Account role. Expert and supplier registrations stay pending until an
/// administrator approves them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Farmer,
    Expert,
    Supplier,
}

impl Role {
    /// Whether registration requires administrator approval before the
    /// account is created.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Role::Expert | Role::Supplier)
    }

    /// Folder profile images of this role are stored under.
    pub fn image_folder(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer-images",
            Role::Expert => "expert-images",
            Role::Supplier => "supplier-images",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Role::Farmer => write!(f, "Farmer"),
            Role::Expert => write!(f, "Expert"),
            Role::Supplier => write!(f, "Supplier"),
        }
    }
}

/// Unknown role stored on database or sent by a client.
#[derive(Debug, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(String);

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Farmer" => Ok(Role::Farmer),
            "Expert" => Ok(Role::Expert),
            "Supplier" => Ok(Role::Supplier),
            _ => Err(UnknownRole(value.to_owned())),
        }
    }
}

/// User account as saved on database.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub address: String,
    pub phone_number: String,
    pub image_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Refresh token as saved on database. Opaque to clients; the token string
/// itself is the primary key.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    /// Mint a fresh token for a user: 64 random bytes from the OS CSPRNG,
    /// base64-encoded, valid for [`REFRESH_TOKEN_TTL_DAYS`].
    pub fn generate(user_id: Uuid) -> Self {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let now = Utc::now();
        Self {
            token: STANDARD.encode(bytes),
            user_id,
            created_at: now,
            expires_at: now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
            revoked_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Active means neither expired nor revoked. Only active tokens may be
    /// rotated into a new access token.
    pub fn is_active(&self) -> bool {
        !self.is_expired() && self.revoked_at.is_none()
    }
}

/// Registration captured before email verification. Promoted to a [`User`]
/// row on OTP confirmation, except for roles awaiting approval.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct TempUser {
    pub email: String,
    pub username: String,
    pub address: String,
    pub phone_number: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub image_url: Option<String>,
    pub is_approved: bool,
}
