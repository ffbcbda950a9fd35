//! PostgreSQL-backed token store.

use crate::models::{
    AuditAction, AuditLog, EnrollmentToken, NewEnrollmentToken, TokenFilter, TokenStatistics,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{created_details, TokenStore};
use crate::services::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const TOKEN_COLUMNS: &str = "id, username, token, group_name, email, notes, created_at, \
     expires_at, enrolled, revoked, certificate_issued_at, package_path";

const USERNAME_CONSTRAINT: &str = "enrollment_tokens_username_key";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "enrollment-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_audit(
        tx: &mut Transaction<'_, Postgres>,
        entry: &AuditLog,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (timestamp, action, username, details)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.timestamp)
        .bind(entry.action.as_str())
        .bind(&entry.username)
        .bind(&entry.details)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn lock_by_username(
        tx: &mut Transaction<'_, Postgres>,
        username: &str,
    ) -> Result<Option<EnrollmentToken>, sqlx::Error> {
        sqlx::query_as::<_, EnrollmentToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM enrollment_tokens WHERE username = $1 FOR UPDATE"
        ))
        .bind(username)
        .fetch_optional(&mut **tx)
        .await
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, new), fields(username = %new.username))]
    async fn create_token(
        &self,
        new: NewEnrollmentToken,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentToken, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_token"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        if let Some(existing) = Self::lock_by_username(&mut tx, &new.username).await? {
            if existing.is_live_at(now) {
                return Err(ServiceError::ActiveTokenExists(new.username));
            }
            sqlx::query("DELETE FROM enrollment_tokens WHERE id = $1")
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;
        }

        let username = new.username.clone();
        let record = sqlx::query_as::<_, EnrollmentToken>(&format!(
            r#"
            INSERT INTO enrollment_tokens
                (id, username, token, group_name, email, notes, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.token)
        .bind(&new.group_name)
        .bind(&new.email)
        .bind(&new.notes)
        .bind(new.created_at)
        .bind(new.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            // A concurrent create won the race for this username.
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(USERNAME_CONSTRAINT) =>
            {
                ServiceError::ActiveTokenExists(username.clone())
            }
            _ => ServiceError::Database(e),
        })?;

        Self::insert_audit(
            &mut tx,
            &AuditLog::new(AuditAction::TokenCreated, &record.username, now)
                .with_details(created_details(&record)),
        )
        .await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(token_id = %record.id, expires_at = %record.expires_at, "Token created");

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_username"])
            .start_timer();

        let token = sqlx::query_as::<_, EnrollmentToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM enrollment_tokens WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(token)
    }

    #[instrument(skip(self))]
    async fn revoke(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revoke"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let Some(existing) = Self::lock_by_username(&mut tx, username).await? else {
            return Ok(None);
        };

        if existing.revoked {
            tx.commit().await?;
            return Ok(Some(existing));
        }

        let updated = sqlx::query_as::<_, EnrollmentToken>(&format!(
            "UPDATE enrollment_tokens SET revoked = TRUE WHERE id = $1 RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(existing.id)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_audit(
            &mut tx,
            &AuditLog::new(AuditAction::TokenRevoked, username, now),
        )
        .await?;

        tx.commit().await?;
        timer.observe_duration();

        Ok(Some(updated))
    }

    #[instrument(skip(self))]
    async fn mark_enrolled(
        &self,
        username: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let token = sqlx::query_as::<_, EnrollmentToken>(&format!(
            r#"
            UPDATE enrollment_tokens
            SET enrolled = TRUE, certificate_issued_at = $2
            WHERE username = $1
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(issued_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self, path))]
    async fn set_package_path(
        &self,
        username: &str,
        token_id: Uuid,
        path: &str,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let token = sqlx::query_as::<_, EnrollmentToken>(&format!(
            r#"
            UPDATE enrollment_tokens
            SET package_path = $3
            WHERE username = $1 AND id = $2
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(token_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: TokenFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnrollmentToken>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tokens"])
            .start_timer();

        let active_after = match filter {
            TokenFilter::All => None,
            TokenFilter::Active => Some(now),
        };

        let tokens = sqlx::query_as::<_, EnrollmentToken>(&format!(
            r#"
            SELECT {TOKEN_COLUMNS}
            FROM enrollment_tokens
            WHERE ($1::timestamptz IS NULL OR expires_at > $1)
            ORDER BY created_at DESC, username
            "#
        ))
        .bind(active_after)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(tokens)
    }

    #[instrument(skip(self))]
    async fn delete_expired_unenrolled(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cleanup"])
            .start_timer();

        let result = sqlx::query(
            "DELETE FROM enrollment_tokens WHERE expires_at < $1 AND enrolled = FALSE",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn statistics(&self, now: DateTime<Utc>) -> Result<TokenStatistics, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["statistics"])
            .start_timer();

        let stats = sqlx::query_as::<_, TokenStatistics>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE expires_at > $1 AND enrolled = FALSE) AS active,
                COUNT(*) FILTER (WHERE enrolled = TRUE) AS enrolled,
                COUNT(*) FILTER (WHERE expires_at < $1 AND enrolled = FALSE) AS expired,
                COUNT(*) FILTER (WHERE revoked = TRUE) AS revoked
            FROM enrollment_tokens
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(stats)
    }
}
