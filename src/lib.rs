//! GreenEye is an agricultural analytics backend: OTP-gated accounts, JWT
//! sessions and prediction workflows backed by external models.

#![forbid(unsafe_code)]

mod auth;
pub mod config;
mod crops;
mod crypto;
mod database;
pub mod error;
mod images;
mod mail;
mod models;
mod otp;
mod router;
pub mod telemetry;
mod token;
mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::PasswordManager>,
    pub token: token::TokenManager,
    pub mail: mail::MailManager,
    pub images: images::ImageStore,
    pub models: models::ModelClient,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status))
        .nest("/api/authentication", router::authentication::router())
        .nest(
            "/api/crop-disease",
            router::crop_disease::router().route_layer(
                AxumMiddleware::from_fn_with_state(
                    state.clone(),
                    router::auth,
                ),
            ),
        )
        .nest(
            "/api/crop-recommendation",
            router::crop_recommendation::router().route_layer(
                AxumMiddleware::from_fn_with_state(
                    state.clone(),
                    router::auth,
                ),
            ),
        )
        .nest(
            "/api/forecasting",
            router::crop_forecasting::router().route_layer(
                AxumMiddleware::from_fn_with_state(
                    state.clone(),
                    router::auth,
                ),
            ),
        )
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let crypto = Arc::new(crypto::PasswordManager::new(config.argon2.clone())?);

    // handle jwt.
    let Some(token_config) = &config.token else {
        tracing::warn!("missing `token` entry on `config.yaml` file");
        std::process::exit(0);
    };
    let mut token = token::TokenManager::new(&config.url, &token_config.secret);
    if let Some(audience) = &token_config.audience {
        token.audience(audience);
    }

    // handle mail sender.
    let mail = if let Some(cfg) = &config.smtp {
        mail::MailManager::new(cfg)?
    } else {
        tracing::warn!("missing `smtp` entry, mails will be dropped");
        mail::MailManager::default()
    };

    let images = images::ImageStore::new(
        config.uploads.clone().unwrap_or_default().directory,
    );
    let models = models::ModelClient::new(config.models.as_ref())?;

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        images,
        models,
    })
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) fn test_state(pool: sqlx::PgPool) -> AppState {
    let crypto = crypto::PasswordManager::new(Some(config::Argon2 {
        memory_cost: 4096,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }))
    .expect("cannot build password manager");

    AppState {
        config: Arc::new(config::Configuration::default()),
        db: database::Database { postgres: pool },
        crypto: Arc::new(crypto),
        token: token::TokenManager::new(
            "https://greeneye.app/",
            "test-signing-secret",
        ),
        mail: mail::MailManager::default(),
        images: images::ImageStore::new(
            std::env::temp_dir().join("greeneye-router-tests"),
        ),
        models: models::ModelClient::new(None)
            .expect("cannot build model client"),
    }
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) async fn make_request(
    app: Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (axum::http::StatusCode, serde_json::Value) {
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .expect("cannot build request"),
        None => builder
            .body(axum::body::Body::empty())
            .expect("cannot build request"),
    };

    let response = app.oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("cannot read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not json")
    };

    (status, value)
}
