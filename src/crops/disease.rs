use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::AppState;
use crate::crops::HISTORY_NOT_FOUND;
use crate::error::{Result, ServerError};
use crate::images::ImageStore;
use crate::models::ModelClient;

const IMAGE_FOLDER: &str = "crop-diseases";

/// Disease detection record as saved on database.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CropDisease {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub image_url: String,
    pub disease_class: String,
    pub cause: String,
    pub treatment: String,
    pub confidence: f64,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Clone)]
pub struct CropDiseaseRepository {
    pool: Pool<Postgres>,
}

impl CropDiseaseRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &CropDisease) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO crop_diseases
                (user_id, image_url, disease_class, cause, treatment,
                 confidence, sent_at, is_deleted)
                VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
                RETURNING id"#,
        )
        .bind(record.user_id)
        .bind(&record.image_url)
        .bind(&record.disease_class)
        .bind(&record.cause)
        .bind(&record.treatment)
        .bind(record.confidence)
        .bind(record.sent_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Detection history of a user, newest first, soft-deleted rows hidden.
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<CropDisease>> {
        let rows = sqlx::query_as::<_, CropDisease>(
            r#"SELECT id, user_id, image_url, disease_class, cause, treatment,
                confidence, sent_at, is_deleted
                FROM crop_diseases
                WHERE user_id = $1 AND is_deleted = FALSE
                ORDER BY sent_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Soft-delete one history row. Returns false when the row does not
    /// exist, belongs to someone else or is already deleted.
    pub async fn soft_delete(&self, user_id: Uuid, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE crop_diseases SET is_deleted = TRUE
                WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE"#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Disease detection workflow: model call, image archival, history row.
#[derive(Clone)]
pub struct CropDiseaseService {
    repo: CropDiseaseRepository,
    images: ImageStore,
    models: ModelClient,
}

impl CropDiseaseService {
    /// Create a new [`CropDiseaseService`] from shared state.
    pub fn new(state: &AppState) -> Self {
        Self {
            repo: CropDiseaseRepository::new(state.db.postgres.clone()),
            images: state.images.clone(),
            models: state.models.clone(),
        }
    }

    /// Run detection on an uploaded leaf image. The image is archived and a
    /// history row written only after the model answered, so failed calls
    /// leave no trace.
    pub async fn detect(
        &self,
        user_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<CropDisease> {
        let prediction = self
            .models
            .detect_disease(file_name, bytes.clone())
            .await?;

        let image_url = self.images.save(file_name, &bytes, IMAGE_FOLDER).await?;

        let mut record = CropDisease {
            id: 0,
            user_id,
            image_url,
            disease_class: prediction.disease_class,
            cause: prediction.cause,
            treatment: prediction.treatment,
            confidence: prediction.confidence,
            sent_at: Utc::now(),
            is_deleted: false,
        };
        record.id = self.repo.insert(&record).await?;
        tracing::info!(
            %user_id,
            disease = %record.disease_class,
            "disease detection recorded"
        );

        Ok(record)
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<CropDisease>> {
        self.repo.history(user_id).await
    }

    pub async fn delete(&self, user_id: Uuid, id: i64) -> Result<()> {
        if !self.repo.soft_delete(user_id, id).await? {
            return Err(ServerError::not_found(HISTORY_NOT_FOUND));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{Role, User, UserRepository};

    async fn seed_user(pool: &Pool<Postgres>, email: &str) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            username: "samir".into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
            address: "Giza".into(),
            phone_number: "01234567890".into(),
            image_url: None,
            role: Role::Farmer,
            created_at: Utc::now(),
        };
        UserRepository::new(pool.clone()).insert(&user).await.unwrap();
        user.id
    }

    fn sample(user_id: Uuid) -> CropDisease {
        CropDisease {
            id: 0,
            user_id,
            image_url: "/uploads/crop-diseases/a.png".into(),
            disease_class: "Tomato___Late_blight".into(),
            cause: "Phytophthora infestans".into(),
            treatment: "Remove infected plants".into(),
            confidence: 0.97,
            sent_at: Utc::now(),
            is_deleted: false,
        }
    }

    #[sqlx::test]
    async fn test_history_is_scoped_to_user(pool: Pool<Postgres>) {
        let repo = CropDiseaseRepository::new(pool.clone());
        let alice = seed_user(&pool, "alice@x.com").await;
        let bob = seed_user(&pool, "bob@x.com").await;

        repo.insert(&sample(alice)).await.unwrap();
        repo.insert(&sample(alice)).await.unwrap();
        repo.insert(&sample(bob)).await.unwrap();

        assert_eq!(repo.history(alice).await.unwrap().len(), 2);
        assert_eq!(repo.history(bob).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    async fn test_soft_delete_hides_row(pool: Pool<Postgres>) {
        let repo = CropDiseaseRepository::new(pool.clone());
        let alice = seed_user(&pool, "alice@x.com").await;

        let id = repo.insert(&sample(alice)).await.unwrap();
        assert!(repo.soft_delete(alice, id).await.unwrap());
        assert!(repo.history(alice).await.unwrap().is_empty());

        // Already deleted, wrong owner and unknown id all report false.
        assert!(!repo.soft_delete(alice, id).await.unwrap());
        assert!(!repo.soft_delete(Uuid::new_v4(), id).await.unwrap());
        assert!(!repo.soft_delete(alice, 9_999).await.unwrap());
    }
}
