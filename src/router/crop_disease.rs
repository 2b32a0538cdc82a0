//! Disease detection endpoints. Every route requires a bearer token.

use axum::extract::{Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};

use crate::AppState;
use crate::crops::{CropDisease, CropDiseaseService};
use crate::error::{Result, ServerError};
use crate::router::{CurrentUser, GeneralResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/detect", post(detect))
        .route("/history", get(history))
        .route("/history/{id}", delete(delete_history))
}

async fn detect(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<GeneralResponse<CropDisease>>> {
    let mut image_name = String::new();
    let mut image_bytes = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("image") {
            image_name = field.file_name().unwrap_or_default().to_owned();
            image_bytes = field.bytes().await?.to_vec();
        }
    }

    if image_bytes.is_empty() {
        return Err(ServerError::business("Please upload a valid image file"));
    }

    let record = CropDiseaseService::new(&state)
        .detect(user.id, &image_name, image_bytes)
        .await?;

    Ok(GeneralResponse::ok(record))
}

async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<GeneralResponse<Vec<CropDisease>>>> {
    let rows = CropDiseaseService::new(&state).history(user.id).await?;

    Ok(GeneralResponse::ok(rows))
}

async fn delete_history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<GeneralResponse<()>>> {
    CropDiseaseService::new(&state).delete(user.id, id).await?;

    Ok(GeneralResponse::message("History item deleted"))
}
