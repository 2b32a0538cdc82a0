//! One-time passwords gating registration and password reset.

mod repository;
mod service;

pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Validity window of an issued code.
pub const OTP_TTL_MINUTES: i64 = 5;

/// Why an OTP was issued. At most one live OTP exists per email, and its
/// purpose must match on validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtpPurpose {
    EmailVerification,
    ResetPassword,
}

impl std::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OtpPurpose::EmailVerification => write!(f, "EmailVerification"),
            OtpPurpose::ResetPassword => write!(f, "ResetPassword"),
        }
    }
}

/// Unknown purpose stored on database.
#[derive(Debug, thiserror::Error)]
#[error("unknown otp purpose `{0}`")]
pub struct UnknownPurpose(String);

impl TryFrom<String> for OtpPurpose {
    type Error = UnknownPurpose;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "EmailVerification" => Ok(OtpPurpose::EmailVerification),
            "ResetPassword" => Ok(OtpPurpose::ResetPassword),
            _ => Err(UnknownPurpose(value)),
        }
    }
}

/// OTP record as saved on database. Keyed by email; inert once used or past
/// its expiry, and only ever replaced afterwards.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct Otp {
    pub email: String,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Result of issuing or refreshing an OTP.
///
/// `sent=false` means the caller must not assume delivery; issuance failures
/// degrade to this rather than raising.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpOutcome {
    pub sent: bool,
    pub expires_in: Option<DateTime<Utc>>,
}

/// Draw a 6-digit code, uniform over [100000, 999999], from the OS CSPRNG.
pub fn generate_code() -> String {
    OsRng.gen_range(100_000..1_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_is_six_digits() {
        for _ in 0..1_000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..1_000_000).contains(&value));
        }
    }

    #[test]
    fn test_purpose_round_trip() {
        for purpose in [OtpPurpose::EmailVerification, OtpPurpose::ResetPassword]
        {
            let stored = purpose.to_string();
            assert_eq!(OtpPurpose::try_from(stored).unwrap(), purpose);
        }
        assert!(OtpPurpose::try_from("Sideways".to_string()).is_err());
    }
}
