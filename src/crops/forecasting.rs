use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::models::{ForecastItem, ModelClient};

const HISTORY_EMPTY: &str =
    "Unable to retrieve historical data for the specified location";
const FORECAST_FAILED: &str =
    "Unable to generate forecast. Please try again later";

/// One forecast month as saved on database.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DesertificationForecast {
    pub id: i64,
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    pub year: i32,
    pub month: i32,
    pub ndvi: f64,
    pub t2m_c: f64,
    pub td2m_c: f64,
    pub rh_pct: f64,
    pub tp_m: f64,
    pub ssrd_jm2: f64,
    pub risk_level: Option<String>,
    pub risk_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// Forecast answer for one coordinate: the final forecast year by month.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastReport {
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    pub forecasts: Vec<ForecastItem>,
    pub generated_at: DateTime<Utc>,
}

/// Forecast history rolled up per queried location.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ForecastLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub total_forecasts: i64,
    pub latest_risk_level: Option<String>,
}

#[derive(Clone)]
pub struct ForecastRepository {
    pool: Pool<Postgres>,
}

impl ForecastRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert the months of one forecast run in a single transaction.
    pub async fn insert_batch(
        &self,
        records: &[DesertificationForecast],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"INSERT INTO desertification_forecasts
                    (user_id, latitude, longitude, location_name, year, month,
                     ndvi, t2m_c, td2m_c, rh_pct, tp_m, ssrd_jm2,
                     risk_level, risk_confidence, created_at, is_deleted)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                            $12, $13, $14, $15, FALSE)"#,
            )
            .bind(record.user_id)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(&record.location_name)
            .bind(record.year)
            .bind(record.month)
            .bind(record.ndvi)
            .bind(record.t2m_c)
            .bind(record.td2m_c)
            .bind(record.rh_pct)
            .bind(record.tp_m)
            .bind(record.ssrd_jm2)
            .bind(&record.risk_level)
            .bind(record.risk_confidence)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Soft-delete every earlier forecast of a user for one coordinate, so a
    /// re-run replaces the previous answer instead of stacking on it.
    pub async fn soft_delete_for_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE desertification_forecasts SET is_deleted = TRUE
                WHERE user_id = $1 AND latitude = $2 AND longitude = $3
                AND is_deleted = FALSE"#,
        )
        .bind(user_id)
        .bind(latitude)
        .bind(longitude)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Forecast history of a user grouped per location, most recently
    /// updated first.
    pub async fn locations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ForecastLocation>> {
        let rows = sqlx::query_as::<_, ForecastLocation>(
            r#"SELECT latitude, longitude, location_name,
                MAX(created_at) AS last_updated,
                COUNT(*) AS total_forecasts,
                (ARRAY_AGG(risk_level ORDER BY created_at DESC))[1]
                    AS latest_risk_level
                FROM desertification_forecasts
                WHERE user_id = $1 AND is_deleted = FALSE
                GROUP BY latitude, longitude, location_name
                ORDER BY last_updated DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Desertification forecasting workflow: historical readings, model call,
/// history rows.
#[derive(Clone)]
pub struct ForecastService {
    repo: ForecastRepository,
    models: ModelClient,
}

impl ForecastService {
    /// Create a new [`ForecastService`] from shared state.
    pub fn new(state: &AppState) -> Self {
        Self {
            repo: ForecastRepository::new(state.db.postgres.clone()),
            models: state.models.clone(),
        }
    }

    /// Forecast desertification risk for a coordinate: fetch a year of
    /// historical readings, run the model over them and keep only the final
    /// forecast year. Earlier forecasts for the same coordinate are replaced.
    pub async fn forecast(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<ForecastReport> {
        let history = self.models.fetch_history(latitude, longitude).await?;
        let readings = history.features.unwrap_or_default();
        if !history.success || readings.is_empty() {
            return Err(ServerError::not_found(HISTORY_EMPTY));
        }

        let queried_location = history
            .location_name
            .clone()
            .unwrap_or_else(|| format!("{latitude},{longitude}"));

        let answer = self.models.forecast(&queried_location, &readings).await?;
        let forecast = match answer.forecast {
            Some(forecast) if answer.success => forecast,
            _ => return Err(ServerError::unavailable(FORECAST_FAILED)),
        };

        // Keep the last forecast year only.
        let Some(last_year) = forecast.iter().map(|item| item.year).max()
        else {
            return Err(ServerError::unavailable(FORECAST_FAILED));
        };
        let forecasts: Vec<ForecastItem> = forecast
            .into_iter()
            .filter(|item| item.year == last_year)
            .collect();

        self.repo
            .soft_delete_for_location(user_id, latitude, longitude)
            .await?;

        let generated_at = Utc::now();
        let records: Vec<DesertificationForecast> = forecasts
            .iter()
            .map(|item| DesertificationForecast {
                id: 0,
                user_id,
                latitude,
                longitude,
                location_name: history.location_name.clone(),
                year: item.year,
                month: item.month,
                ndvi: item.ndvi,
                t2m_c: item.t2m_c,
                td2m_c: item.td2m_c,
                rh_pct: item.rh_pct,
                tp_m: item.tp_m,
                ssrd_jm2: item.ssrd_jm2,
                risk_level: item.risk_level.clone(),
                risk_confidence: item.risk_confidence,
                created_at: generated_at,
                is_deleted: false,
            })
            .collect();
        self.repo.insert_batch(&records).await?;
        tracing::info!(
            %user_id,
            location = %queried_location,
            months = forecasts.len(),
            "desertification forecast recorded"
        );

        Ok(ForecastReport {
            latitude,
            longitude,
            location_name: history.location_name,
            forecasts,
            generated_at,
        })
    }

    pub async fn history(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ForecastLocation>> {
        self.repo.locations(user_id).await
    }
}
