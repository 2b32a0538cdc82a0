//! Handle database requests for users, temp users and refresh tokens.

use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::user::{RefreshToken, TempUser, User};

#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users
                (id, username, email, password_hash, address, phone_number,
                 image_url, role, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.address)
        .bind(&user.phone_number)
        .bind(&user.image_url)
        .bind(user.role.to_string())
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, email, password_hash, address,
                phone_number, image_url, role, created_at
                FROM users WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, email, password_hash, address,
                phone_number, image_url, role, created_at
                FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn update_password(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE email = $1")
            .bind(email)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Most recent still-active refresh token for a user, if any. Login
    /// hands this back instead of minting one per session.
    pub async fn active_refresh_token(
        &self,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"SELECT token, user_id, created_at, expires_at, revoked_at
                FROM refresh_tokens
                WHERE user_id = $1 AND revoked_at IS NULL
                    AND expires_at > NOW()
                ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    pub async fn insert_refresh_token(
        &self,
        token: &RefreshToken,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO refresh_tokens
                (token, user_id, created_at, expires_at, revoked_at)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"SELECT token, user_id, created_at, expires_at, revoked_at
                FROM refresh_tokens WHERE token = $1"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Revoke `old` and persist `new` in one transaction.
    ///
    /// The revocation is conditional on the old token still being active, so
    /// two concurrent rotations of the same token cannot both succeed; the
    /// loser rolls back and gets a business error.
    pub async fn rotate_refresh_token(
        &self,
        old: &str,
        new: &RefreshToken,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            r#"UPDATE refresh_tokens SET revoked_at = NOW()
                WHERE token = $1 AND revoked_at IS NULL
                    AND expires_at > NOW()"#,
        )
        .bind(old)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(ServerError::business("Invalid token"));
        }

        sqlx::query(
            r#"INSERT INTO refresh_tokens
                (token, user_id, created_at, expires_at, revoked_at)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&new.token)
        .bind(new.user_id)
        .bind(new.created_at)
        .bind(new.expires_at)
        .bind(new.revoked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Mark a token revoked. Returns false when the token does not exist or
    /// was already revoked.
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE refresh_tokens SET revoked_at = NOW()
                WHERE token = $1 AND revoked_at IS NULL"#,
        )
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert a pending registration, or rewrite an existing one for the
    /// same email. Re-registering before confirmation replaces the earlier
    /// attempt wholesale.
    pub async fn insert_temp(&self, temp: &TempUser) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO temp_users
                (email, username, address, phone_number, password_hash, role,
                 image_url, is_approved)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (email) DO UPDATE
                SET username = $2, address = $3, phone_number = $4,
                    password_hash = $5, role = $6, image_url = $7,
                    is_approved = $8"#,
        )
        .bind(&temp.email)
        .bind(&temp.username)
        .bind(&temp.address)
        .bind(&temp.phone_number)
        .bind(&temp.password_hash)
        .bind(temp.role.to_string())
        .bind(&temp.image_url)
        .bind(temp.is_approved)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_temp(&self, email: &str) -> Result<Option<TempUser>> {
        let temp = sqlx::query_as::<_, TempUser>(
            r#"SELECT email, username, address, phone_number, password_hash,
                role, image_url, is_approved
                FROM temp_users WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(temp)
    }

    pub async fn delete_temp(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM temp_users WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;
    use chrono::Utc;

    fn sample_user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: "samir".into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
            address: "Giza".into(),
            phone_number: "01234567890".into(),
            image_url: Some("/uploads/farmer-images/a.png".into()),
            role: Role::Farmer,
            created_at: Utc::now(),
        }
    }

    #[sqlx::test]
    async fn test_insert_and_find_user(pool: Pool<Postgres>) {
        let repo = UserRepository::new(pool);
        let user = sample_user("samir@x.com");

        repo.insert(&user).await.unwrap();

        let by_email = repo
            .find_by_email("samir@x.com")
            .await
            .unwrap()
            .expect("user must exist");
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.role, Role::Farmer);

        let by_id = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, user.email);

        assert!(repo.find_by_email("ghost@x.com").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_update_password(pool: Pool<Postgres>) {
        let repo = UserRepository::new(pool);
        let user = sample_user("samir@x.com");
        repo.insert(&user).await.unwrap();

        repo.update_password("samir@x.com", "$argon2id$new")
            .await
            .unwrap();

        let updated = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(updated.password_hash, "$argon2id$new");
    }

    #[sqlx::test]
    async fn test_rotation_revokes_old_token(pool: Pool<Postgres>) {
        let repo = UserRepository::new(pool);
        let user = sample_user("samir@x.com");
        repo.insert(&user).await.unwrap();

        let old = RefreshToken::generate(user.id);
        repo.insert_refresh_token(&old).await.unwrap();

        let new = RefreshToken::generate(user.id);
        repo.rotate_refresh_token(&old.token, &new).await.unwrap();

        let stored_old =
            repo.find_refresh_token(&old.token).await.unwrap().unwrap();
        assert!(stored_old.revoked_at.is_some());

        let stored_new =
            repo.find_refresh_token(&new.token).await.unwrap().unwrap();
        assert!(stored_new.is_active());

        // A revoked token cannot rotate again.
        let third = RefreshToken::generate(user.id);
        let err = repo
            .rotate_refresh_token(&old.token, &third)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid token"));
        assert!(
            repo.find_refresh_token(&third.token)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[sqlx::test]
    async fn test_active_token_lookup_skips_revoked(pool: Pool<Postgres>) {
        let repo = UserRepository::new(pool);
        let user = sample_user("samir@x.com");
        repo.insert(&user).await.unwrap();

        let token = RefreshToken::generate(user.id);
        repo.insert_refresh_token(&token).await.unwrap();

        let active = repo.active_refresh_token(user.id).await.unwrap().unwrap();
        assert_eq!(active.token, token.token);

        assert!(repo.revoke_refresh_token(&token.token).await.unwrap());
        assert!(repo.active_refresh_token(user.id).await.unwrap().is_none());

        // Idempotent from the caller's view but reported as a no-op.
        assert!(!repo.revoke_refresh_token(&token.token).await.unwrap());
    }

    #[sqlx::test]
    async fn test_temp_user_upsert(pool: Pool<Postgres>) {
        let repo = UserRepository::new(pool);

        let mut temp = TempUser {
            email: "pending@x.com".into(),
            username: "pending".into(),
            address: "Cairo".into(),
            phone_number: "01098765432".into(),
            password_hash: "$argon2id$stub".into(),
            role: Role::Expert,
            image_url: None,
            is_approved: false,
        };
        repo.insert_temp(&temp).await.unwrap();

        temp.username = "renamed".into();
        repo.insert_temp(&temp).await.unwrap();

        let stored = repo.find_temp("pending@x.com").await.unwrap().unwrap();
        assert_eq!(stored.username, "renamed");
        assert_eq!(stored.role, Role::Expert);
        assert!(!stored.is_approved);

        repo.delete_temp("pending@x.com").await.unwrap();
        assert!(repo.find_temp("pending@x.com").await.unwrap().is_none());
    }
}
