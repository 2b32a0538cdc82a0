use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::models::ModelClient;

const EXTRACTION_FAILED: &str =
    "Could not extract soil and weather features for this location.";

/// Recommendation record as saved on database.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CropRecommendation {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    pub recommended_crops: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Clone)]
pub struct CropRecommendationRepository {
    pool: Pool<Postgres>,
}

impl CropRecommendationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &CropRecommendation) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO crop_recommendations
                (user_id, latitude, longitude, location_name,
                 recommended_crops, created_at, is_deleted)
                VALUES ($1, $2, $3, $4, $5, $6, FALSE)
                RETURNING id"#,
        )
        .bind(record.user_id)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.location_name)
        .bind(&record.recommended_crops)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Recommendation history of a user, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CropRecommendation>> {
        let rows = sqlx::query_as::<_, CropRecommendation>(
            r#"SELECT id, user_id, latitude, longitude, location_name,
                recommended_crops, created_at, is_deleted
                FROM crop_recommendations
                WHERE user_id = $1 AND is_deleted = FALSE
                ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Recommendation workflow: model call plus history row.
#[derive(Clone)]
pub struct CropRecommendationService {
    repo: CropRecommendationRepository,
    models: ModelClient,
}

impl CropRecommendationService {
    /// Create a new [`CropRecommendationService`] from shared state.
    pub fn new(state: &AppState) -> Self {
        Self {
            repo: CropRecommendationRepository::new(state.db.postgres.clone()),
            models: state.models.clone(),
        }
    }

    /// Extract soil and weather features for the coordinate, ask the model
    /// which crops fit them and persist the answer. The location name falls
    /// back to the extraction metadata, then to "lat,lon".
    pub async fn recommend(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
        location_name: Option<String>,
    ) -> Result<CropRecommendation> {
        let extraction =
            self.models.extract_features(latitude, longitude).await?;
        let features = match extraction.features {
            Some(features) if extraction.success => features,
            _ => return Err(ServerError::business(EXTRACTION_FAILED)),
        };

        let location_name = location_name
            .or_else(|| extraction.metadata.and_then(|m| m.location_name))
            .unwrap_or_else(|| format!("{latitude},{longitude}"));

        let recommended_crops = self
            .models
            .recommend_crops(&location_name, &features)
            .await?;

        let mut record = CropRecommendation {
            id: 0,
            user_id,
            latitude,
            longitude,
            location_name,
            recommended_crops,
            created_at: Utc::now(),
            is_deleted: false,
        };
        record.id = self.repo.insert(&record).await?;
        tracing::info!(
            %user_id,
            location = %record.location_name,
            crops = record.recommended_crops.len(),
            "crop recommendation recorded"
        );

        Ok(record)
    }

    pub async fn history(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CropRecommendation>> {
        self.repo.history(user_id).await
    }
}
