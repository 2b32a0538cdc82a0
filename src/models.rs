//! HTTP client for the external prediction model services.
//!
//! Every outbound call is bounded by a timeout; a non-success status or a
//! transport failure is surfaced as a 503 business error rather than the raw
//! transport error.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::Models;
use crate::error::{Result, ServerError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const DISEASE_UNAVAILABLE: &str =
    "Unable to detect disease. Please try again later";
const RECOMMENDATION_UNAVAILABLE: &str =
    "Crop recommendation model is currently unavailable. Please try again later";
const EXTRACTION_UNAVAILABLE: &str =
    "Failed to extract features from external service";
const HISTORY_UNAVAILABLE: &str =
    "Unable to retrieve historical data. Please check the location coordinates";
const FORECASTING_UNAVAILABLE: &str =
    "Forecasting model is currently unavailable. Please try again later";

/// Prediction returned by the crop disease model.
#[derive(Clone, Debug, Deserialize)]
pub struct DiseasePrediction {
    #[serde(rename = "class")]
    pub disease_class: String,
    pub cause: String,
    pub treatment: String,
    pub confidence: f64,
}

/// Feature vector expected by the crop recommendation model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CropFeatures {
    pub year: i32,
    pub month: i32,
    pub sand: f64,
    pub silt: f64,
    pub clay: f64,
    pub soc: f64,
    pub ph: f64,
    pub bdod: f64,
    pub cec: f64,
    pub ndvi: f64,
    pub t2m_c: f64,
    pub td2m_c: f64,
    pub rh_pct: f64,
    pub tp_m: f64,
    pub ssrd_jm2: f64,
    pub lc_type1: i32,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Feature extraction answer: soil and weather readings for a coordinate.
#[derive(Clone, Debug, Deserialize)]
pub struct ExtractedFeatures {
    #[serde(default)]
    pub success: bool,
    pub features: Option<CropFeatures>,
    #[serde(default)]
    pub metadata: Option<ExtractionMetadata>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExtractionMetadata {
    pub location_name: Option<String>,
}

/// Twelve months of historical readings for a coordinate.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryData {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub features: Option<Vec<CropFeatures>>,
}

/// One month of the forecasting model answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForecastItem {
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
}

#[derive(Clone, Debug, Deserialize)]
pub struct ForecastingAnswer {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub forecast: Option<Vec<ForecastItem>>,
}

#[derive(Debug, Serialize)]
struct CoordinatesPayload {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct LocationMetadata<'a> {
    location_name: &'a str,
}

#[derive(Debug, Serialize)]
struct RecommendationPayload<'a> {
    metadata: LocationMetadata<'a>,
    features: &'a CropFeatures,
}

/// Features as the forecasting model wants them: no coordinates.
#[derive(Debug, Serialize)]
struct ForecastingFeatures {
    year: i32,
    month: i32,
    ndvi: f64,
    t2m_c: f64,
    td2m_c: f64,
    rh_pct: f64,
    tp_m: f64,
    ssrd_jm2: f64,
    sand: f64,
    silt: f64,
    clay: f64,
    soc: f64,
    ph: f64,
    bdod: f64,
    cec: f64,
    nitrogen: f64,
    phosphorus: f64,
    potassium: f64,
    lc_type1: i32,
}

impl From<&CropFeatures> for ForecastingFeatures {
    fn from(f: &CropFeatures) -> Self {
        Self {
            year: f.year,
            month: f.month,
            ndvi: f.ndvi,
            t2m_c: f.t2m_c,
            td2m_c: f.td2m_c,
            rh_pct: f.rh_pct,
            tp_m: f.tp_m,
            ssrd_jm2: f.ssrd_jm2,
            sand: f.sand,
            silt: f.silt,
            clay: f.clay,
            soc: f.soc,
            ph: f.ph,
            bdod: f.bdod,
            cec: f.cec,
            nitrogen: f.nitrogen,
            phosphorus: f.phosphorus,
            potassium: f.potassium,
            lc_type1: f.lc_type1,
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastingItemPayload<'a> {
    metadata: LocationMetadata<'a>,
    features: ForecastingFeatures,
}

#[derive(Debug, Serialize)]
struct ForecastingPayload<'a> {
    data: Vec<ForecastingItemPayload<'a>>,
}

/// Client over the external prediction model endpoints.
#[derive(Clone)]
pub struct ModelClient {
    http: Client,
    crop_disease_url: Option<String>,
    crop_recommendation_url: Option<String>,
    feature_extraction_url: Option<String>,
    history_data_url: Option<String>,
    forecasting_url: Option<String>,
}

impl ModelClient {
    /// Create a new [`ModelClient`] from configuration.
    pub fn new(config: Option<&Models>) -> Result<Self> {
        let timeout = config
            .and_then(|c| c.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|err| ServerError::Internal {
                details: format!("cannot build model http client: {err}"),
            })?;

        Ok(Self {
            http,
            crop_disease_url: config.and_then(|c| c.crop_disease.clone()),
            crop_recommendation_url: config
                .and_then(|c| c.crop_recommendation.clone()),
            feature_extraction_url: config
                .and_then(|c| c.feature_extraction.clone()),
            history_data_url: config.and_then(|c| c.history_data.clone()),
            forecasting_url: config.and_then(|c| c.forecasting.clone()),
        })
    }

    /// Submit an image to the disease detection model.
    pub async fn detect_disease(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DiseasePrediction> {
        let Some(url) = &self.crop_disease_url else {
            tracing::warn!("crop disease model endpoint not configured");
            return Err(ServerError::unavailable(DISEASE_UNAVAILABLE));
        };

        let part = Part::bytes(bytes).file_name(file_name.to_owned());
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "disease model unreachable");
                ServerError::unavailable(DISEASE_UNAVAILABLE)
            })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                "disease model returned non-success status"
            );
            return Err(ServerError::unavailable(DISEASE_UNAVAILABLE));
        }

        response.json().await.map_err(|err| ServerError::Internal {
            details: format!("cannot decode disease model response: {err}"),
        })
    }

    /// Ask the recommendation model for crops suited to the given features.
    pub async fn recommend_crops(
        &self,
        location_name: &str,
        features: &CropFeatures,
    ) -> Result<Vec<String>> {
        let Some(url) = &self.crop_recommendation_url else {
            tracing::warn!("crop recommendation model endpoint not configured");
            return Err(ServerError::unavailable(RECOMMENDATION_UNAVAILABLE));
        };

        let payload = RecommendationPayload {
            metadata: LocationMetadata { location_name },
            features,
        };

        // The model answers with a rank → crop map.
        let ranked: HashMap<String, String> = self
            .post_json(url, &payload, RECOMMENDATION_UNAVAILABLE, "recommendation")
            .await?;

        Ok(ranked.into_values().collect())
    }

    /// Extract soil and weather features for a coordinate.
    pub async fn extract_features(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ExtractedFeatures> {
        let Some(url) = &self.feature_extraction_url else {
            tracing::warn!("feature extraction endpoint not configured");
            return Err(ServerError::unavailable(EXTRACTION_UNAVAILABLE));
        };

        let payload = CoordinatesPayload {
            latitude,
            longitude,
        };
        self.post_json(url, &payload, EXTRACTION_UNAVAILABLE, "feature extraction")
            .await
    }

    /// Fetch twelve months of historical readings for a coordinate.
    pub async fn fetch_history(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<HistoryData> {
        let Some(url) = &self.history_data_url else {
            tracing::warn!("history data endpoint not configured");
            return Err(ServerError::unavailable(HISTORY_UNAVAILABLE));
        };

        let payload = CoordinatesPayload {
            latitude,
            longitude,
        };
        self.post_json(url, &payload, HISTORY_UNAVAILABLE, "history data")
            .await
    }

    /// Run the desertification forecasting model over historical readings.
    pub async fn forecast(
        &self,
        location_name: &str,
        features: &[CropFeatures],
    ) -> Result<ForecastingAnswer> {
        let Some(url) = &self.forecasting_url else {
            tracing::warn!("forecasting model endpoint not configured");
            return Err(ServerError::unavailable(FORECASTING_UNAVAILABLE));
        };

        let payload = ForecastingPayload {
            data: features
                .iter()
                .map(|f| ForecastingItemPayload {
                    metadata: LocationMetadata { location_name },
                    features: f.into(),
                })
                .collect(),
        };
        self.post_json(url, &payload, FORECASTING_UNAVAILABLE, "forecasting")
            .await
    }

    async fn post_json<P, T>(
        &self,
        url: &str,
        payload: &P,
        unavailable: &'static str,
        service: &'static str,
    ) -> Result<T>
    where
        P: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "{} service unreachable", service);
                ServerError::unavailable(unavailable)
            })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                "{} service returned non-success status",
                service
            );
            return Err(ServerError::unavailable(unavailable));
        }

        response.json().await.map_err(|err| ServerError::Internal {
            details: format!("cannot decode {service} response: {err}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_unconfigured_endpoints_degrade_to_503() {
        let client = ModelClient::new(None).unwrap();

        let err = client
            .detect_disease("leaf.png", b"bytes".to_vec())
            .await
            .unwrap_err();
        assert_unavailable(err);

        let err = client.extract_features(30.0, 31.0).await.unwrap_err();
        assert_unavailable(err);

        let err = client.fetch_history(30.0, 31.0).await.unwrap_err();
        assert_unavailable(err);

        let err = client.forecast("Giza", &[]).await.unwrap_err();
        assert_unavailable(err);
    }

    fn assert_unavailable(err: crate::error::ServerError) {
        match err {
            crate::error::ServerError::Business { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            },
            other => panic!("expected business error, got {other:?}"),
        }
    }

    #[test]
    fn test_disease_prediction_decoding() {
        let prediction: DiseasePrediction = serde_json::from_str(
            r#"{
                "class": "Tomato___Late_blight",
                "cause": "Phytophthora infestans",
                "treatment": "Remove infected plants",
                "confidence": 0.97
            }"#,
        )
        .unwrap();

        assert_eq!(prediction.disease_class, "Tomato___Late_blight");
        assert!((prediction.confidence - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extraction_response_decoding() {
        let extraction: ExtractedFeatures = serde_json::from_str(
            r#"{
                "success": true,
                "features": {
                    "year": 2025, "month": 6,
                    "sand": 40.0, "silt": 40.0, "clay": 20.0,
                    "soc": 1.2, "ph": 6.8, "bdod": 1.3, "cec": 18.0,
                    "ndvi": 0.6, "t2m_c": 24.0, "td2m_c": 16.0,
                    "rh_pct": 61.0, "tp_m": 0.002, "ssrd_jm2": 19000000.0,
                    "lc_type1": 12, "nitrogen": 90.0, "phosphorus": 42.0,
                    "potassium": 43.0, "latitude": 30.03, "longitude": 31.23
                },
                "metadata": {
                    "location_name": "Giza",
                    "query_timestamp": "2025-06-01T00:00:00Z"
                }
            }"#,
        )
        .unwrap();

        assert!(extraction.success);
        let features = extraction.features.unwrap();
        assert_eq!(features.year, 2025);
        assert!((features.latitude - 30.03).abs() < f64::EPSILON);
        assert_eq!(
            extraction.metadata.unwrap().location_name.as_deref(),
            Some("Giza")
        );
    }

    #[test]
    fn test_forecasting_answer_decoding() {
        let answer: ForecastingAnswer = serde_json::from_str(
            r#"{
                "success": true,
                "forecast": [{
                    "year": 2026, "month": 1, "ndvi": 0.31,
                    "t2m_c": 14.0, "td2m_c": 8.0, "rh_pct": 58.0,
                    "tp_m": 0.001, "ssrd_jm2": 14000000.0,
                    "risk_level": "High", "risk_confidence": 0.83
                }]
            }"#,
        )
        .unwrap();

        assert!(answer.success);
        let forecast = answer.forecast.unwrap();
        assert_eq!(forecast[0].year, 2026);
        assert_eq!(forecast[0].risk_level.as_deref(), Some("High"));
    }
}
