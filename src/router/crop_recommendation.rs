//! Crop recommendation endpoints. Every route requires a bearer token.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::crops::{CropRecommendation, CropRecommendationService};
use crate::error::Result;
use crate::router::{CurrentUser, GeneralResponse, Valid};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RecommendBody {
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
    location_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(recommend))
        .route("/history", get(history))
}

async fn recommend(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Valid(body): Valid<RecommendBody>,
) -> Result<Json<GeneralResponse<CropRecommendation>>> {
    let record = CropRecommendationService::new(&state)
        .recommend(user.id, body.latitude, body.longitude, body.location_name)
        .await?;

    Ok(GeneralResponse::ok(record))
}

async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<GeneralResponse<Vec<CropRecommendation>>>> {
    let rows = CropRecommendationService::new(&state)
        .history(user.id)
        .await?;

    Ok(GeneralResponse::ok(rows))
}
