//! Registration, login and token endpoints.

use std::str::FromStr;
use std::sync::LazyLock;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use regex_lite::Regex;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::auth::{AuthResult, AuthService, NewRegistration};
use crate::error::{Result, ServerError};
use crate::otp::{OtpOutcome, OtpPurpose};
use crate::router::{GeneralResponse, Valid};
use crate::user::Role;

const OTP_SENT: &str = "OTP sent to your email";
const OTP_NOT_SENT: &str =
    "Failed to send OTP email. Please try again later";

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{11}$").unwrap());

fn validate_password(
    password: &str,
) -> std::result::Result<(), ValidationError> {
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if password.len() < 8 || !has_letter || !has_digit {
        return Err(ValidationError::new("password").with_message(
            "Password must be at least 8 characters and contain a letter and a digit"
                .into(),
        ));
    }

    Ok(())
}

fn validate_phone(phone: &str) -> std::result::Result<(), ValidationError> {
    if !PHONE.is_match(phone) {
        return Err(
            ValidationError::new("phone_number")
                .with_message("Phone number must be 11 digits".into()),
        );
    }

    Ok(())
}

#[derive(Debug, Default, Validate)]
struct RegisterForm {
    #[validate(length(min = 3, max = 255))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(custom(function = "validate_password"))]
    password: String,
    #[validate(length(min = 1, max = 512))]
    address: String,
    #[validate(custom(function = "validate_phone"))]
    phone_number: String,
    role: String,
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyOtpBody {
    #[validate(email)]
    email: String,
    #[serde(rename = "type")]
    purpose: OtpPurpose,
    #[validate(length(equal = 6))]
    code: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginBody {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ResendOtpBody {
    #[validate(email)]
    email: String,
    #[serde(rename = "type")]
    purpose: OtpPurpose,
}

#[derive(Debug, Deserialize, Validate)]
struct ForgetPasswordBody {
    #[validate(email)]
    email: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ResetPasswordBody {
    #[validate(email)]
    email: String,
    #[serde(rename = "newPassword")]
    #[validate(custom(function = "validate_password"))]
    new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct TokenBody {
    #[validate(length(min = 1))]
    token: String,
}

/// Authentication routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify-otp", post(verify_otp))
        .route("/login", post(login))
        .route("/resend-otp", post(resend_otp))
        .route("/forget-password", post(forget_password))
        .route("/reset-password", post(reset_password))
        .route("/refresh-token", post(refresh_token))
        .route("/revoke-token", post(revoke_token))
}

fn sent_or_failed(
    outcome: OtpOutcome,
) -> Result<Json<GeneralResponse<OtpOutcome>>> {
    if !outcome.sent {
        return Err(ServerError::business(OTP_NOT_SENT));
    }

    Ok(GeneralResponse::ok_with_message(OTP_SENT, outcome))
}

async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<GeneralResponse<OtpOutcome>>> {
    let mut form = RegisterForm::default();
    let mut image_name = String::new();
    let mut image_bytes = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "name" => form.name = field.text().await?,
            "email" => form.email = field.text().await?,
            "password" => form.password = field.text().await?,
            "address" => form.address = field.text().await?,
            "phoneNumber" => form.phone_number = field.text().await?,
            "role" => form.role = field.text().await?,
            "image" => {
                image_name =
                    field.file_name().unwrap_or_default().to_owned();
                image_bytes = field.bytes().await?.to_vec();
            },
            _ => {},
        }
    }

    form.validate()?;
    let role = Role::from_str(&form.role).map_err(|_| {
        ServerError::business(
            "Invalid role. Allowed roles: Farmer, Expert, Supplier",
        )
    })?;

    let outcome = AuthService::new(&state)
        .register(NewRegistration {
            username: form.name,
            email: form.email,
            password: form.password,
            address: form.address,
            phone_number: form.phone_number,
            role,
            image_name,
            image_bytes,
        })
        .await?;

    if !outcome.sent {
        return Err(ServerError::business(OTP_NOT_SENT));
    }

    Ok(GeneralResponse::ok_with_message(
        "OTP sent to your email, please verify to complete registration",
        outcome,
    ))
}

async fn verify_otp(
    State(state): State<AppState>,
    Valid(body): Valid<VerifyOtpBody>,
) -> Result<Json<GeneralResponse<AuthResult>>> {
    let outcome = AuthService::new(&state)
        .verify_otp(&body.email, &body.code, body.purpose)
        .await?;

    Ok(Json(GeneralResponse {
        is_success: true,
        message: outcome
            .message
            .or_else(|| Some("Account created successfully".into())),
        data: outcome.data,
    }))
}

async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginBody>,
) -> Result<Json<GeneralResponse<AuthResult>>> {
    let session = AuthService::new(&state)
        .login(&body.email, &body.password)
        .await?;

    Ok(GeneralResponse::ok(session))
}

async fn resend_otp(
    State(state): State<AppState>,
    Valid(body): Valid<ResendOtpBody>,
) -> Result<Json<GeneralResponse<OtpOutcome>>> {
    let outcome = AuthService::new(&state)
        .resend_otp(&body.email, body.purpose)
        .await?;

    sent_or_failed(outcome)
}

async fn forget_password(
    State(state): State<AppState>,
    Valid(body): Valid<ForgetPasswordBody>,
) -> Result<Json<GeneralResponse<OtpOutcome>>> {
    let outcome = AuthService::new(&state).forget_password(&body.email).await?;

    sent_or_failed(outcome)
}

async fn reset_password(
    State(state): State<AppState>,
    Valid(body): Valid<ResetPasswordBody>,
) -> Result<Json<GeneralResponse<()>>> {
    AuthService::new(&state)
        .reset_password(&body.email, &body.new_password)
        .await?;

    Ok(GeneralResponse::message("Password reset successfully"))
}

async fn refresh_token(
    State(state): State<AppState>,
    Valid(body): Valid<TokenBody>,
) -> Result<Json<GeneralResponse<AuthResult>>> {
    let session = AuthService::new(&state)
        .refresh_access_token(&body.token)
        .await?;

    Ok(GeneralResponse::ok(session))
}

async fn revoke_token(
    State(state): State<AppState>,
    Valid(body): Valid<TokenBody>,
) -> Result<Json<GeneralResponse<()>>> {
    AuthService::new(&state).revoke_token(&body.token).await?;

    Ok(GeneralResponse::message("Token revoked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::OtpRepository;
    use crate::user::UserRepository;
    use crate::{app, make_request, test_state};
    use axum::http::StatusCode;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    const EMAIL: &str = "samir@x.com";
    const PASSWORD: &str = "Passw0rd!";

    async fn seed_registration(
        state: &AppState,
        role: Role,
    ) -> String {
        AuthService::new(state)
            .register(NewRegistration {
                username: "samir".into(),
                email: EMAIL.into(),
                password: PASSWORD.into(),
                address: "Giza".into(),
                phone_number: "01234567890".into(),
                role,
                image_name: "me.png".into(),
                image_bytes: b"fake-png".to_vec(),
            })
            .await
            .unwrap();

        OtpRepository::new(state.db.postgres.clone())
            .find(EMAIL)
            .await
            .unwrap()
            .unwrap()
            .code
    }

    async fn seed_account(state: &AppState) {
        let code = seed_registration(state, Role::Farmer).await;
        AuthService::new(state)
            .verify_otp(EMAIL, &code, OtpPurpose::EmailVerification)
            .await
            .unwrap();
    }

    #[sqlx::test]
    async fn test_login_rejects_unknown_email(pool: Pool<Postgres>) {
        let app = app(test_state(pool));

        let (status, body) = make_request(
            app,
            "POST",
            "/api/authentication/login",
            None,
            Some(json!({ "email": "ghost@x.com", "password": PASSWORD })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["isSuccess"], json!(false));
        assert_eq!(body["message"], json!("Invalid email or password"));
    }

    #[sqlx::test]
    async fn test_login_validates_payload(pool: Pool<Postgres>) {
        let app = app(test_state(pool));

        let (status, body) = make_request(
            app,
            "POST",
            "/api/authentication/login",
            None,
            Some(json!({ "email": "not-an-email", "password": PASSWORD })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], json!("Validation error"));
    }

    #[sqlx::test]
    async fn test_verify_otp_creates_account(pool: Pool<Postgres>) {
        let state = test_state(pool.clone());
        let code = seed_registration(&state, Role::Farmer).await;
        let app = app(state);

        let (status, body) = make_request(
            app,
            "POST",
            "/api/authentication/verify-otp",
            None,
            Some(json!({
                "email": EMAIL,
                "type": "EmailVerification",
                "code": code,
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isSuccess"], json!(true));
        assert_eq!(body["data"]["isAuthenticated"], json!(true));
        assert_eq!(body["data"]["email"], json!(EMAIL));

        let users = UserRepository::new(pool);
        assert!(users.find_by_email(EMAIL).await.unwrap().is_some());
        assert!(users.find_temp(EMAIL).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_verify_otp_holds_expert_for_approval(pool: Pool<Postgres>) {
        let state = test_state(pool.clone());
        let code = seed_registration(&state, Role::Expert).await;
        let app = app(state);

        let (status, body) = make_request(
            app,
            "POST",
            "/api/authentication/verify-otp",
            None,
            Some(json!({
                "email": EMAIL,
                "type": "EmailVerification",
                "code": code,
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("pending approval"));
        assert!(body.get("data").is_none() || body["data"].is_null());

        let users = UserRepository::new(pool);
        assert!(users.find_by_email(EMAIL).await.unwrap().is_none());
        assert!(users.find_temp(EMAIL).await.unwrap().is_some());
    }

    #[sqlx::test]
    async fn test_refresh_rotates_and_invalidates(pool: Pool<Postgres>) {
        let state = test_state(pool);
        seed_account(&state).await;
        let app = app(state);

        let (_, login) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/login",
            None,
            Some(json!({ "email": EMAIL, "password": PASSWORD })),
        )
        .await;
        let first = login["data"]["refreshToken"].as_str().unwrap().to_owned();

        let (status, refreshed) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/refresh-token",
            None,
            Some(json!({ "token": first })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second =
            refreshed["data"]["refreshToken"].as_str().unwrap().to_owned();
        assert_ne!(second, first);

        // The presented token died with the rotation.
        let (status, replay) = make_request(
            app,
            "POST",
            "/api/authentication/refresh-token",
            None,
            Some(json!({ "token": first })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(replay["message"], json!("Invalid token"));
    }

    #[sqlx::test]
    async fn test_revoke_token(pool: Pool<Postgres>) {
        let state = test_state(pool);
        seed_account(&state).await;
        let app = app(state);

        let (_, login) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/login",
            None,
            Some(json!({ "email": EMAIL, "password": PASSWORD })),
        )
        .await;
        let token = login["data"]["refreshToken"].as_str().unwrap().to_owned();

        let (status, body) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/revoke-token",
            None,
            Some(json!({ "token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("Token revoked"));

        let (status, body) = make_request(
            app,
            "POST",
            "/api/authentication/refresh-token",
            None,
            Some(json!({ "token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], json!("Invalid token"));
    }

    #[sqlx::test]
    async fn test_password_reset_endpoints(pool: Pool<Postgres>) {
        let state = test_state(pool.clone());
        seed_account(&state).await;
        let app = app(state);

        let (status, _) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/forget-password",
            None,
            Some(json!({ "email": EMAIL })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let code = OtpRepository::new(pool)
            .find(EMAIL)
            .await
            .unwrap()
            .unwrap()
            .code;

        let (status, body) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/verify-otp",
            None,
            Some(json!({
                "email": EMAIL,
                "type": "ResetPassword",
                "code": code,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("OTP verified successfully"));

        let (status, _) = make_request(
            app.clone(),
            "POST",
            "/api/authentication/reset-password",
            None,
            Some(json!({ "email": EMAIL, "newPassword": "N3w-Passw0rd" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = make_request(
            app,
            "POST",
            "/api/authentication/login",
            None,
            Some(json!({ "email": EMAIL, "password": "N3w-Passw0rd" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
