use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::models::enrollment_token::{DEFAULT_EXPIRY_MINUTES, DEFAULT_GROUP};
use crate::models::{EnrollmentToken, NewEnrollmentToken, TokenFilter, TokenStatistics};
use crate::services::clock::Clock;
use crate::services::metrics::{
    PACKAGES_BUILT_TOTAL, TOKENS_CLEANED_TOTAL, TOKENS_CREATED_TOTAL, TOKENS_REVOKED_TOTAL,
};
use crate::services::package::{PackageBuilder, PackageRequest};
use crate::services::store::TokenStore;
use crate::services::ServiceError;
use crate::utils::{generate_token, validate_username};

/// Upper bound on `expiry_minutes`: one year.
pub const MAX_EXPIRY_MINUTES: i64 = 525_600;

/// Width of the `email` column.
pub const EMAIL_MAX_LEN: usize = 255;

#[derive(Debug, Clone, Default)]
pub struct CreateTokenInput {
    pub username: String,
    pub group_name: Option<String>,
    pub expiry_minutes: Option<i64>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// Token lifecycle: create, read, list, revoke, expire, and package.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    packages: Arc<PackageBuilder>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, packages: PackageBuilder) -> Self {
        Self {
            store,
            clock,
            packages: Arc::new(packages),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.store.health_check().await
    }

    #[instrument(skip(self, input), fields(username = %input.username))]
    pub async fn create_token(
        &self,
        input: CreateTokenInput,
    ) -> Result<EnrollmentToken, ServiceError> {
        validate_username(&input.username)
            .map_err(|_| ServiceError::Validation(format!("Invalid username: {}", input.username)))?;

        let expiry_minutes = input.expiry_minutes.unwrap_or(DEFAULT_EXPIRY_MINUTES);
        if !(1..=MAX_EXPIRY_MINUTES).contains(&expiry_minutes) {
            return Err(ServiceError::Validation(format!(
                "expiry_minutes must be between 1 and {}",
                MAX_EXPIRY_MINUTES
            )));
        }

        if input.email.as_ref().is_some_and(|e| e.len() > EMAIL_MAX_LEN) {
            return Err(ServiceError::Validation(format!(
                "email must be at most {} characters",
                EMAIL_MAX_LEN
            )));
        }

        let group_name = input
            .group_name
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());

        let now = self.clock.now();
        let mut new = NewEnrollmentToken::new(
            input.username,
            generate_token(),
            group_name,
            expiry_minutes,
            now,
        )
        .ok_or_else(|| ServiceError::Validation("expiry_minutes is out of range".to_string()))?;
        new.email = input.email;
        new.notes = input.notes;

        match self.store.create_token(new, now).await {
            Ok(token) => {
                TOKENS_CREATED_TOTAL.with_label_values(&["ok"]).inc();
                info!(expires_at = %token.expires_at, group = %token.group_name, "Enrollment token created");
                Ok(token)
            }
            Err(e @ ServiceError::ActiveTokenExists(_)) => {
                TOKENS_CREATED_TOTAL.with_label_values(&["conflict"]).inc();
                Err(e)
            }
            Err(e) => {
                TOKENS_CREATED_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    pub async fn get_token(&self, username: &str) -> Result<EnrollmentToken, ServiceError> {
        self.store
            .find_by_username(username)
            .await?
            .ok_or_else(|| ServiceError::TokenNotFound(username.to_string()))
    }

    /// Idempotent: revoking a revoked token succeeds without change.
    #[instrument(skip(self))]
    pub async fn revoke_token(&self, username: &str) -> Result<EnrollmentToken, ServiceError> {
        match self.store.revoke(username, self.clock.now()).await? {
            Some(token) => {
                TOKENS_REVOKED_TOTAL.with_label_values(&["ok"]).inc();
                info!("Enrollment token revoked");
                Ok(token)
            }
            None => {
                TOKENS_REVOKED_TOTAL.with_label_values(&["not_found"]).inc();
                Err(ServiceError::TokenNotFound(username.to_string()))
            }
        }
    }

    pub async fn list_tokens(
        &self,
        filter: TokenFilter,
    ) -> Result<Vec<EnrollmentToken>, ServiceError> {
        self.store.list(filter, self.clock.now()).await
    }

    /// Delete expired tokens that were never enrolled. `trigger` labels the
    /// caller in metrics (`cli` for the scheduled sweep).
    pub async fn cleanup_expired_tokens(&self, trigger: &str) -> Result<u64, ServiceError> {
        sweep_expired_tokens(self.store.as_ref(), self.clock.as_ref(), trigger).await
    }

    pub async fn get_statistics(&self) -> Result<TokenStatistics, ServiceError> {
        self.store.statistics(self.clock.now()).await
    }

    /// Called by the enrollment consumer once a certificate has been issued.
    #[instrument(skip(self))]
    pub async fn mark_enrolled(
        &self,
        username: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<EnrollmentToken, ServiceError> {
        let token = self
            .store
            .mark_enrolled(username, issued_at)
            .await?
            .ok_or_else(|| ServiceError::TokenNotFound(username.to_string()))?;

        info!("Token marked enrolled");
        Ok(token)
    }

    /// Build (or rebuild) the package for the current token and record its
    /// location.
    #[instrument(skip(self))]
    pub async fn build_package(&self, username: &str) -> Result<EnrollmentToken, ServiceError> {
        let token = self.get_token(username).await?;

        let builder = Arc::clone(&self.packages);
        let (user, secret, group) = (
            token.username.clone(),
            token.token.clone(),
            token.group_name.clone(),
        );
        let built = tokio::task::spawn_blocking(move || {
            builder.build(&PackageRequest {
                username: &user,
                token: &secret,
                group_name: &group,
            })
        })
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Package task failed: {}", e)))?;

        let path = match built {
            Ok(path) => {
                PACKAGES_BUILT_TOTAL.with_label_values(&["ok"]).inc();
                path
            }
            Err(e) => {
                PACKAGES_BUILT_TOTAL.with_label_values(&["error"]).inc();
                warn!(error = %e, "Package build failed");
                return Err(e.into());
            }
        };

        // The record may have been replaced while the archive was written.
        self.store
            .set_package_path(username, token.id, &path.to_string_lossy())
            .await?
            .ok_or_else(|| ServiceError::TokenNotFound(username.to_string()))
    }

    /// Location of a previously built package that still exists on disk.
    pub async fn package_file(&self, username: &str) -> Result<PathBuf, ServiceError> {
        let token = self.get_token(username).await?;
        let path = token
            .package_path
            .map(PathBuf::from)
            .ok_or_else(|| ServiceError::PackageNotFound(username.to_string()))?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServiceError::PackageNotFound(username.to_string()));
        }
        Ok(path)
    }
}

/// Cleanup without a full `TokenService`; the sweep needs no package builder.
#[instrument(skip(store, clock))]
pub async fn sweep_expired_tokens(
    store: &dyn TokenStore,
    clock: &dyn Clock,
    trigger: &str,
) -> Result<u64, ServiceError> {
    let deleted_count = store.delete_expired_unenrolled(clock.now()).await?;

    TOKENS_CLEANED_TOTAL
        .with_label_values(&[trigger])
        .inc_by(deleted_count as f64);
    info!(deleted_count, "Expired tokens cleaned up");

    Ok(deleted_count)
}
