use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::mail::MailManager;
use crate::otp::{
    OTP_TTL_MINUTES, Otp, OtpOutcome, OtpPurpose, OtpRepository, generate_code,
};

const PURPOSE_MISMATCH: &str = "Check the OTP type";

/// OTP manager: issues, refreshes, validates and removes codes.
#[derive(Clone)]
pub struct OtpService {
    repo: OtpRepository,
    mail: MailManager,
    subject: String,
}

impl OtpService {
    /// Create a new [`OtpService`].
    pub fn new(
        pool: Pool<Postgres>,
        mail: MailManager,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            repo: OtpRepository::new(pool),
            mail,
            subject: subject.into(),
        }
    }

    fn fresh(email: &str, purpose: OtpPurpose) -> Otp {
        Otp {
            email: email.to_owned(),
            code: generate_code(),
            purpose,
            expires_at: Utc::now() + Duration::minutes(OTP_TTL_MINUTES),
            used: false,
        }
    }

    async fn persist_and_send(&self, otp: &Otp) -> Result<()> {
        self.repo.upsert(otp).await?;
        tracing::debug!(email = %otp.email, "otp stored");

        self.mail
            .send(
                &otp.email,
                &self.subject,
                &format!(
                    "Welcome, your OTP for {} is {}",
                    otp.purpose, otp.code
                ),
            )
            .await?;
        tracing::info!(email = %otp.email, "otp sent");

        Ok(())
    }

    /// Issue a new OTP and email it.
    ///
    /// Store and mail failures degrade to `sent=false` instead of raising so
    /// the enclosing workflow can still answer; callers must check the flag.
    pub async fn issue(&self, email: &str, purpose: OtpPurpose) -> OtpOutcome {
        let otp = Self::fresh(email, purpose);

        match self.persist_and_send(&otp).await {
            Ok(()) => OtpOutcome {
                sent: true,
                expires_in: Some(otp.expires_at),
            },
            Err(err) => {
                tracing::error!(%email, error = %err, "otp issuance failed");
                OtpOutcome {
                    sent: false,
                    expires_in: None,
                }
            },
        }
    }

    /// Refresh the OTP for an email: behaves as [`Self::issue`] when no
    /// record exists; rewrites the existing record in place when it is
    /// unused and the purpose matches; errors on a purpose mismatch, which
    /// signals a workflow bug rather than a wrong code.
    pub async fn refresh(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> Result<OtpOutcome> {
        let existing = self.repo.find(email).await?;

        match existing {
            None => Ok(self.issue(email, purpose).await),
            Some(otp) if !otp.used && otp.purpose == purpose => {
                let refreshed = Self::fresh(email, purpose);
                match self.persist_and_send(&refreshed).await {
                    Ok(()) => Ok(OtpOutcome {
                        sent: true,
                        expires_in: Some(refreshed.expires_at),
                    }),
                    Err(err) => {
                        tracing::error!(%email, error = %err, "otp refresh failed");
                        Ok(OtpOutcome {
                            sent: false,
                            expires_in: None,
                        })
                    },
                }
            },
            Some(otp) if otp.purpose != purpose => {
                Err(ServerError::business(PURPOSE_MISMATCH))
            },
            // Used record: replace it, same as issuing anew.
            Some(_) => Ok(self.issue(email, purpose).await),
        }
    }

    /// Validate a code. Returns false when no record exists or the code,
    /// used-flag or expiry check fails; errors when the stored purpose
    /// differs from the requested one. A successful validation marks the
    /// record used, so a given code validates at most once.
    pub async fn validate(
        &self,
        email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<bool> {
        let Some(otp) = self.repo.find(email).await? else {
            return Ok(false);
        };

        if otp.purpose != purpose {
            return Err(ServerError::business(PURPOSE_MISMATCH));
        }

        self.repo.consume(email, code, purpose).await
    }

    /// Delete any OTP for the email. Idempotent.
    pub async fn remove(&self, email: &str) -> Result<()> {
        self.repo.delete(email).await
    }
}
