//! Desertification forecasting endpoints. Every route requires a bearer
//! token.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::crops::{ForecastLocation, ForecastReport, ForecastService};
use crate::error::Result;
use crate::router::{CurrentUser, GeneralResponse, Valid};

#[derive(Debug, Deserialize, Validate)]
struct ForecastBody {
    #[validate(range(
        min = -90.0,
        max = 90.0,
        message = "Latitude must be between -90 and 90"
    ))]
    latitude: f64,
    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be between -180 and 180"
    ))]
    longitude: f64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(forecast))
        .route("/history", get(history))
}

async fn forecast(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Valid(body): Valid<ForecastBody>,
) -> Result<Json<GeneralResponse<ForecastReport>>> {
    let report = ForecastService::new(&state)
        .forecast(user.id, body.latitude, body.longitude)
        .await?;

    Ok(GeneralResponse::ok(report))
}

async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<GeneralResponse<Vec<ForecastLocation>>>> {
    let rows = ForecastService::new(&state).history(user.id).await?;

    Ok(GeneralResponse::ok(rows))
}

#[cfg(test)]
mod tests {
    use crate::user::{Role, User, UserRepository};
    use crate::{app, make_request, test_state};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::{Pool, Postgres};
    use uuid::Uuid;

    async fn seed_user(state: &crate::AppState) -> String {
        let user = User {
            id: Uuid::new_v4(),
            username: "samir".into(),
            email: "samir@x.com".into(),
            password_hash: "$argon2id$stub".into(),
            address: "Giza".into(),
            phone_number: "01234567890".into(),
            image_url: None,
            role: Role::Farmer,
            created_at: Utc::now(),
        };
        UserRepository::new(state.db.postgres.clone())
            .insert(&user)
            .await
            .unwrap();

        let (token, _) = state
            .token
            .create(&user.id.to_string(), &user.username, &user.email, &[
                "Farmer".to_string(),
            ])
            .unwrap();
        token
    }

    #[sqlx::test]
    async fn test_forecast_requires_token(pool: Pool<Postgres>) {
        let app = app(test_state(pool));

        let (status, _) = make_request(
            app,
            "POST",
            "/api/forecasting",
            None,
            Some(json!({ "latitude": 30.0, "longitude": 31.0 })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_forecast_rejects_bad_coordinates(pool: Pool<Postgres>) {
        let state = test_state(pool);
        let token = seed_user(&state).await;
        let app = app(state);

        let (status, body) = make_request(
            app,
            "POST",
            "/api/forecasting",
            Some(&token),
            Some(json!({ "latitude": 30.0, "longitude": -200.0 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["data"][0]["field"], json!("longitude"));
        assert_eq!(
            body["data"][0]["message"],
            json!("Longitude must be between -180 and 180")
        );
    }

    #[sqlx::test]
    async fn test_unconfigured_history_data_degrades_to_503(
        pool: Pool<Postgres>,
    ) {
        let state = test_state(pool);
        let token = seed_user(&state).await;
        let app = app(state);

        let (status, body) = make_request(
            app,
            "POST",
            "/api/forecasting",
            Some(&token),
            Some(json!({ "latitude": 30.0, "longitude": 31.0 })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body["message"],
            json!(
                "Unable to retrieve historical data. \
                 Please check the location coordinates"
            )
        );
    }

    #[sqlx::test]
    async fn test_history_starts_empty(pool: Pool<Postgres>) {
        let state = test_state(pool);
        let token = seed_user(&state).await;
        let app = app(state);

        let (status, body) = make_request(
            app,
            "GET",
            "/api/forecasting/history",
            Some(&token),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
    }
}
