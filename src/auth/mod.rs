//! Registration, login and token lifecycle workflows.

mod service;

pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::Role;

/// Authenticated session handed to clients after login, OTP confirmation or
/// a token refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub is_authenticated: bool,
    pub email: String,
    pub user_name: String,
    pub user_id: Uuid,
    pub address: String,
    pub phone_number: String,
    pub roles: Vec<String>,
    pub access_token: String,
    pub expires_in: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expiration: DateTime<Utc>,
}

/// Outcome of an OTP confirmation: either an authenticated session or a
/// plain message (password-reset confirmation, registration kept pending).
#[derive(Clone, Debug)]
pub struct VerifyOutcome {
    pub message: Option<String>,
    pub data: Option<AuthResult>,
}

/// Validated registration input, image already read off the wire.
#[derive(Clone, Debug)]
pub struct NewRegistration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub address: String,
    pub phone_number: String,
    pub role: Role,
    pub image_name: String,
    pub image_bytes: Vec<u8>,
}
