//! Persistence seam for enrollment tokens and their audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{
    AuditAction, AuditLog, EnrollmentToken, NewEnrollmentToken, TokenFilter, TokenStatistics,
};
use crate::services::ServiceError;

/// Storage contract for the token lifecycle.
///
/// Every method is a single atomic unit against the backing store. Time
/// predicates use the `now` supplied by the caller, never the store's clock.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    /// Insert a token for `new.username`.
    ///
    /// Fails with [`ServiceError::ActiveTokenExists`] when a record that is
    /// live at `now` exists. An expired record is deleted in the same unit,
    /// and a `TOKEN_CREATED` audit entry is appended.
    async fn create_token(
        &self,
        new: NewEnrollmentToken,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentToken, ServiceError>;

    async fn find_by_username(&self, username: &str)
        -> Result<Option<EnrollmentToken>, ServiceError>;

    /// Set `revoked`. Repeat calls succeed and leave the record unchanged.
    async fn revoke(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError>;

    async fn mark_enrolled(
        &self,
        username: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError>;

    /// Record the archive location, but only on the record with `token_id`,
    /// so a package built for a replaced token is never attached to its
    /// successor.
    async fn set_package_path(
        &self,
        username: &str,
        token_id: Uuid,
        path: &str,
    ) -> Result<Option<EnrollmentToken>, ServiceError>;

    /// Records ordered newest first.
    async fn list(
        &self,
        filter: TokenFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnrollmentToken>, ServiceError>;

    /// Delete every record with `expires_at < now` that was never enrolled.
    async fn delete_expired_unenrolled(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;

    async fn statistics(&self, now: DateTime<Utc>) -> Result<TokenStatistics, ServiceError>;
}

/// Audit detail recorded with `TOKEN_CREATED`.
pub(crate) fn created_details(token: &EnrollmentToken) -> String {
    format!(
        "group={} expires_at={}",
        token.group_name,
        token.expires_at.to_rfc3339()
    )
}

#[derive(Default)]
struct MemoryState {
    tokens: HashMap<String, EnrollmentToken>,
    audit: Vec<AuditLog>,
}

/// Process-local store. One mutex guards both tables, so each call is atomic.
#[derive(Default)]
pub struct InMemoryTokenStore {
    state: Mutex<MemoryState>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditLog> {
        self.lock().audit.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn create_token(
        &self,
        new: NewEnrollmentToken,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentToken, ServiceError> {
        let mut state = self.lock();

        if let Some(existing) = state.tokens.get(&new.username) {
            if existing.is_live_at(now) {
                return Err(ServiceError::ActiveTokenExists(new.username));
            }
        }

        let record = new.into_record(Uuid::new_v4());
        // Replaces (deletes) any stale record for the username.
        state
            .tokens
            .insert(record.username.clone(), record.clone());
        state.audit.push(
            AuditLog::new(AuditAction::TokenCreated, &record.username, now)
                .with_details(created_details(&record)),
        );

        Ok(record)
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        Ok(self.lock().tokens.get(username).cloned())
    }

    async fn revoke(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let mut state = self.lock();
        let Some(token) = state.tokens.get_mut(username) else {
            return Ok(None);
        };

        let transitioned = !token.revoked;
        token.revoked = true;
        let updated = token.clone();

        if transitioned {
            state
                .audit
                .push(AuditLog::new(AuditAction::TokenRevoked, username, now));
        }

        Ok(Some(updated))
    }

    async fn mark_enrolled(
        &self,
        username: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let mut state = self.lock();
        Ok(state.tokens.get_mut(username).map(|token| {
            token.enrolled = true;
            token.certificate_issued_at = Some(issued_at);
            token.clone()
        }))
    }

    async fn set_package_path(
        &self,
        username: &str,
        token_id: Uuid,
        path: &str,
    ) -> Result<Option<EnrollmentToken>, ServiceError> {
        let mut state = self.lock();
        Ok(state
            .tokens
            .get_mut(username)
            .filter(|token| token.id == token_id)
            .map(|token| {
                token.package_path = Some(path.to_string());
                token.clone()
            }))
    }

    async fn list(
        &self,
        filter: TokenFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnrollmentToken>, ServiceError> {
        let state = self.lock();
        let mut tokens: Vec<EnrollmentToken> = state
            .tokens
            .values()
            .filter(|token| match filter {
                TokenFilter::All => true,
                TokenFilter::Active => token.expires_at > now,
            })
            .cloned()
            .collect();

        tokens.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(tokens)
    }

    async fn delete_expired_unenrolled(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut state = self.lock();
        let before = state.tokens.len();
        state
            .tokens
            .retain(|_, token| !(token.expires_at < now && !token.enrolled));
        Ok((before - state.tokens.len()) as u64)
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<TokenStatistics, ServiceError> {
        let state = self.lock();
        let mut stats = TokenStatistics::default();
        for token in state.tokens.values() {
            stats.record(token, now);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enrollment_token::DEFAULT_GROUP;
    use chrono::Duration;

    fn new_token(username: &str, minutes: i64, now: DateTime<Utc>) -> NewEnrollmentToken {
        NewEnrollmentToken::new(
            username.to_string(),
            crate::utils::generate_token(),
            DEFAULT_GROUP.to_string(),
            minutes,
            now,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_live_and_replaces_stale() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();

        let first = store.create_token(new_token("alice", 60, now), now).await.unwrap();
        let err = store
            .create_token(new_token("alice", 60, now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ActiveTokenExists(ref u) if u == "alice"));

        let later = now + Duration::minutes(61);
        let second = store
            .create_token(new_token("alice", 60, later), later)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list(TokenFilter::All, later).await.unwrap().len(), 1);
        assert_eq!(store.audit_entries().len(), 2);
    }

    #[tokio::test]
    async fn revoke_audits_only_the_transition() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        store.create_token(new_token("bob", 60, now), now).await.unwrap();

        assert!(store.revoke("bob", now).await.unwrap().unwrap().revoked);
        assert!(store.revoke("bob", now).await.unwrap().unwrap().revoked);
        assert!(store.revoke("nobody", now).await.unwrap().is_none());

        let actions: Vec<AuditAction> =
            store.audit_entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::TokenCreated, AuditAction::TokenRevoked]);
    }

    #[tokio::test]
    async fn package_path_only_attaches_to_matching_record() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let token = store.create_token(new_token("carol", 60, now), now).await.unwrap();

        assert!(store
            .set_package_path("carol", Uuid::new_v4(), "/tmp/x.zip")
            .await
            .unwrap()
            .is_none());
        let updated = store
            .set_package_path("carol", token.id, "/tmp/enroll-carol.zip")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.package_path.as_deref(), Some("/tmp/enroll-carol.zip"));
    }
}
