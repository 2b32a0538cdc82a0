//! Manage incoming requests.

pub mod authentication;
pub mod crop_disease;
pub mod crop_forecasting;
pub mod crop_recommendation;

use axum::Json;
use axum::extract::{FromRequest, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralResponse<T: Serialize> {
    pub is_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> GeneralResponse<T> {
    /// Successful response carrying data.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            is_success: true,
            message: None,
            data: Some(data),
        })
    }

    /// Successful response carrying a message and data.
    pub fn ok_with_message(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            is_success: true,
            message: Some(message.into()),
            data: Some(data),
        })
    }
}

impl GeneralResponse<()> {
    /// Successful response carrying only a message.
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            is_success: true,
            message: Some(message.into()),
            data: None,
        })
    }
}

/// JSON extractor running `validator` checks before the handler sees the
/// payload.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Identity extracted from the access token by the [`auth`] middleware.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser {
    pub id: Uuid,
}

/// Require a valid bearer token and expose the caller as a [`CurrentUser`]
/// extension.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ServerError::Unauthorized)?;

    let claims = state
        .token
        .decode(token)
        .map_err(|_| ServerError::Unauthorized)?;
    let id = claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| ServerError::Unauthorized)?;

    request.extensions_mut().insert(CurrentUser { id });

    Ok(next.run(request).await)
}

/// Instance status handler.
pub async fn status(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.config.name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
