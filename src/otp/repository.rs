//! Handle database requests for OTP records.

use sqlx::{Pool, Postgres};

use crate::error::Result;
use crate::otp::{Otp, OtpPurpose};

#[derive(Clone)]
pub struct OtpRepository {
    pool: Pool<Postgres>,
}

impl OtpRepository {
    /// Create a new [`OtpRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Find the record for an email, if any.
    pub async fn find(&self, email: &str) -> Result<Option<Otp>> {
        let otp = sqlx::query_as::<_, Otp>(
            r#"SELECT email, code, purpose, expires_at, used
                FROM otps WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(otp)
    }

    /// Insert a fresh record, or rewrite the existing one in place with a new
    /// code and expiry (`used` reset to false).
    pub async fn upsert(&self, otp: &Otp) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO otps (email, code, purpose, expires_at, used)
                VALUES ($1, $2, $3, $4, FALSE)
                ON CONFLICT (email) DO UPDATE
                SET code = $2, purpose = $3, expires_at = $4, used = FALSE"#,
        )
        .bind(&otp.email)
        .bind(&otp.code)
        .bind(otp.purpose.to_string())
        .bind(otp.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically mark the record used when, and only when, it is unused,
    /// the code and purpose match and the expiry has not passed.
    ///
    /// The single conditional UPDATE is the row-level lock preventing two
    /// concurrent validations from both succeeding.
    pub async fn consume(
        &self,
        email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE otps SET used = TRUE
                WHERE email = $1 AND code = $2 AND purpose = $3
                    AND used = FALSE AND expires_at > NOW()"#,
        )
        .bind(email)
        .bind(code)
        .bind(purpose.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete any record for the email. No-op when absent.
    pub async fn delete(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM otps WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
