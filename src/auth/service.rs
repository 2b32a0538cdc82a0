use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::AppState;
use crate::auth::{AuthResult, NewRegistration, VerifyOutcome};
use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::images::ImageStore;
use crate::otp::{OtpOutcome, OtpPurpose, OtpService};
use crate::token::TokenManager;
use crate::user::{RefreshToken, TempUser, User, UserRepository};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_OTP: &str = "Invalid or expired OTP";
const INVALID_TOKEN: &str = "Invalid token";
const PENDING_APPROVAL: &str =
    "Your registration is pending approval. You will be notified once an administrator reviews it";

/// Orchestrates registration, login, password reset and the refresh-token
/// lifecycle on top of the repositories and collaborators.
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    otp: OtpService,
    crypto: Arc<PasswordManager>,
    token: TokenManager,
    images: ImageStore,
}

impl AuthService {
    /// Create a new [`AuthService`] from shared state.
    pub fn new(state: &AppState) -> Self {
        Self {
            users: UserRepository::new(state.db.postgres.clone()),
            otp: OtpService::new(
                state.db.postgres.clone(),
                state.mail.clone(),
                state.config.name.clone(),
            ),
            crypto: Arc::clone(&state.crypto),
            token: state.token.clone(),
            images: state.images.clone(),
        }
    }

    fn session(&self, user: &User, refresh: &RefreshToken) -> Result<AuthResult> {
        let roles = vec![user.role.to_string()];
        let (access_token, expires_in) = self.token.create(
            &user.id.to_string(),
            &user.username,
            &user.email,
            &roles,
        )?;

        Ok(AuthResult {
            is_authenticated: true,
            email: user.email.clone(),
            user_name: user.username.clone(),
            user_id: user.id,
            address: user.address.clone(),
            phone_number: user.phone_number.clone(),
            roles,
            access_token,
            expires_in,
            refresh_token: refresh.token.clone(),
            refresh_token_expiration: refresh.expires_at,
        })
    }

    /// Capture a registration and send the verification OTP. The account is
    /// not created yet; [`Self::verify_otp`] promotes it.
    pub async fn register(&self, reg: NewRegistration) -> Result<OtpOutcome> {
        if self.users.find_by_email(&reg.email).await?.is_some() {
            return Err(ServerError::business(
                "Cannot create an account for this email",
            ));
        }

        let image_url = self
            .images
            .save(&reg.image_name, &reg.image_bytes, reg.role.image_folder())
            .await?;

        // Hashed before it ever touches the temp table.
        let password_hash = self.crypto.hash_password(&reg.password)?;

        self.users
            .insert_temp(&TempUser {
                email: reg.email.clone(),
                username: reg.username,
                address: reg.address,
                phone_number: reg.phone_number,
                password_hash,
                role: reg.role,
                image_url: Some(image_url),
                is_approved: false,
            })
            .await?;
        tracing::info!(email = %reg.email, role = %reg.role, "registration captured");

        Ok(self
            .otp
            .issue(&reg.email, OtpPurpose::EmailVerification)
            .await)
    }

    /// Confirm an OTP. For email verification the pending registration is
    /// promoted into an account (or held for approval); for password reset
    /// the code is consumed and the caller may proceed to
    /// [`Self::reset_password`].
    pub async fn verify_otp(
        &self,
        email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<VerifyOutcome> {
        if !self.otp.validate(email, code, purpose).await? {
            return Err(ServerError::business(INVALID_OTP));
        }

        match purpose {
            OtpPurpose::EmailVerification => {
                let outcome = self.create_account(email).await?;
                self.otp.remove(email).await?;
                Ok(outcome)
            },
            OtpPurpose::ResetPassword => {
                self.otp.remove(email).await?;
                Ok(VerifyOutcome {
                    message: Some("OTP verified successfully".into()),
                    data: None,
                })
            },
        }
    }

    /// Promote a verified registration into an account. Roles requiring
    /// approval stay in the temp table until an administrator flips
    /// `is_approved`; everyone else gets a user row and a live session.
    async fn create_account(&self, email: &str) -> Result<VerifyOutcome> {
        let Some(temp) = self.users.find_temp(email).await? else {
            return Err(ServerError::business(
                "No registration found for this email",
            ));
        };

        if temp.role.requires_approval() && !temp.is_approved {
            tracing::info!(%email, role = %temp.role, "registration held for approval");
            return Ok(VerifyOutcome {
                message: Some(PENDING_APPROVAL.into()),
                data: None,
            });
        }

        let user = User {
            id: Uuid::new_v4(),
            username: temp.username,
            email: temp.email,
            password_hash: temp.password_hash,
            address: temp.address,
            phone_number: temp.phone_number,
            image_url: temp.image_url,
            role: temp.role,
            created_at: Utc::now(),
        };
        self.users.insert(&user).await?;
        self.users.delete_temp(email).await?;

        let refresh = RefreshToken::generate(user.id);
        self.users.insert_refresh_token(&refresh).await?;
        tracing::info!(%email, user_id = %user.id, "account created");

        Ok(VerifyOutcome {
            message: None,
            data: Some(self.session(&user, &refresh)?),
        })
    }

    /// Authenticate with email and password. The failure message never
    /// distinguishes an unknown email from a wrong password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResult> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Err(ServerError::business(INVALID_CREDENTIALS));
        };

        if !self.crypto.verify_password(password, &user.password_hash) {
            return Err(ServerError::business(INVALID_CREDENTIALS));
        }

        let refresh = match self.users.active_refresh_token(user.id).await? {
            Some(active) => active,
            None => {
                let fresh = RefreshToken::generate(user.id);
                self.users.insert_refresh_token(&fresh).await?;
                fresh
            },
        };
        tracing::info!(%email, user_id = %user.id, "login succeeded");

        self.session(&user, &refresh)
    }

    /// Resend (refresh) the OTP for a pending registration or a password
    /// reset.
    pub async fn resend_otp(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> Result<OtpOutcome> {
        match purpose {
            OtpPurpose::EmailVerification => {
                if self.users.find_by_email(email).await?.is_some() {
                    return Err(ServerError::business(
                        "This email already has an account",
                    ));
                }
                if self.users.find_temp(email).await?.is_none() {
                    return Err(ServerError::business(
                        "No registration found for this email, please register first",
                    ));
                }
            },
            OtpPurpose::ResetPassword => {
                if self.users.find_by_email(email).await?.is_none() {
                    return Err(ServerError::business("User not found"));
                }
            },
        }

        self.otp.refresh(email, purpose).await
    }

    /// Start a password reset by sending a reset OTP.
    pub async fn forget_password(&self, email: &str) -> Result<OtpOutcome> {
        if self.users.find_by_email(email).await?.is_none() {
            return Err(ServerError::business("User not found"));
        }

        Ok(self.otp.issue(email, OtpPurpose::ResetPassword).await)
    }

    /// Replace the password. Callers are expected to have confirmed the
    /// reset OTP through [`Self::verify_otp`] first.
    pub async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
    ) -> Result<()> {
        if self.users.find_by_email(email).await?.is_none() {
            return Err(ServerError::business("Invalid user"));
        }

        let password_hash = self.crypto.hash_password(new_password)?;
        self.users.update_password(email, &password_hash).await?;
        tracing::info!(%email, "password reset");

        Ok(())
    }

    /// Rotate a refresh token into a fresh session. The presented token is
    /// revoked and the new one is returned; replaying the old token fails.
    /// Unknown and inactive tokens answer with the same message, so callers
    /// cannot tell whether a guessed token ever existed.
    pub async fn refresh_access_token(&self, token: &str) -> Result<AuthResult> {
        let Some(stored) = self.users.find_refresh_token(token).await? else {
            return Err(ServerError::business(INVALID_TOKEN));
        };
        if !stored.is_active() {
            return Err(ServerError::business(INVALID_TOKEN));
        }

        let Some(user) = self.users.find_by_id(stored.user_id).await? else {
            return Err(ServerError::business(INVALID_TOKEN));
        };

        let next = RefreshToken::generate(user.id);
        self.users.rotate_refresh_token(token, &next).await?;
        tracing::info!(user_id = %user.id, "refresh token rotated");

        self.session(&user, &next)
    }

    /// Revoke a refresh token so it can no longer be rotated. Only active
    /// tokens can be revoked; unknown, expired and already revoked ones all
    /// answer with the same message.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let Some(stored) = self.users.find_refresh_token(token).await? else {
            return Err(ServerError::business(INVALID_TOKEN));
        };
        if !stored.is_active() {
            return Err(ServerError::business(INVALID_TOKEN));
        }

        self.users.revoke_refresh_token(token).await?;
        tracing::info!(user_id = %stored.user_id, "refresh token revoked");

        Ok(())
    }
}
