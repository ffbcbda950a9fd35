use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{EnrollmentToken, TokenStatistics};
use crate::services::tokens::CreateTokenInput;
use crate::services::NotificationOutcome;
use crate::utils::validate_username;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTokenRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,

    #[validate(length(min = 1, max = 128, message = "Group name must be 1-128 characters"))]
    pub group_name: Option<String>,

    #[validate(range(
        min = 1,
        max = 525_600,
        message = "Expiry must be between 1 minute and 1 year"
    ))]
    pub expiry_minutes: Option<i64>,

    /// Bounded by the `email` column width as well as address syntax.
    #[validate(
        email(message = "Invalid email address"),
        length(max = 255, message = "Email must be at most 255 characters")
    )]
    pub email: Option<String>,

    pub notes: Option<String>,

    #[serde(default)]
    pub send_email: bool,
}

impl CreateTokenRequest {
    /// Address to notify, present only when the caller asked for mail.
    pub fn notify_address(&self) -> Option<&str> {
        self.email.as_deref().filter(|_| self.send_email)
    }

    pub fn to_input(&self) -> CreateTokenInput {
        CreateTokenInput {
            username: self.username.clone(),
            group_name: self.group_name.clone(),
            expiry_minutes: self.expiry_minutes,
            email: self.email.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Token as rendered to API clients, with status derived at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub id: Uuid,
    pub username: String,
    pub token: String,
    pub group_name: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub enrolled: bool,
    pub revoked: bool,
    pub certificate_issued_at: Option<DateTime<Utc>>,
    pub has_package: bool,
    pub is_expired: bool,
    pub is_valid: bool,
}

impl TokenData {
    pub fn from_token(token: EnrollmentToken, now: DateTime<Utc>) -> Self {
        let is_expired = token.is_expired_at(now);
        let is_valid = token.is_valid_at(now);
        Self {
            id: token.id,
            username: token.username,
            token: token.token,
            group_name: token.group_name,
            email: token.email,
            notes: token.notes,
            created_at: token.created_at,
            expires_at: token.expires_at,
            enrolled: token.enrolled,
            revoked: token.revoked,
            certificate_issued_at: token.certificate_issued_at,
            has_package: token.package_path.is_some(),
            is_expired,
            is_valid,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    pub success: bool,
    pub token_data: TokenData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token_data: TokenData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenListResponse {
    pub success: bool,
    pub tokens: Vec<TokenData>,
}

#[derive(Debug, Deserialize)]
pub struct ListTokensQuery {
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub stats: TokenStatistics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(json: serde_json::Value) -> CreateTokenRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn minimal_request_is_valid() {
        let req = request(serde_json::json!({ "username": "alice" }));
        assert!(req.validate().is_ok());
        assert!(!req.send_email);
        assert_eq!(req.notify_address(), None);
    }

    #[test]
    fn rejects_bad_fields() {
        for body in [
            serde_json::json!({ "username": "../alice" }),
            serde_json::json!({ "username": "alice", "expiry_minutes": 0 }),
            serde_json::json!({ "username": "alice", "expiry_minutes": 525_601 }),
            serde_json::json!({ "username": "alice", "email": "not-an-email" }),
            serde_json::json!({ "username": "alice", "group_name": "" }),
        ] {
            assert!(request(body.clone()).validate().is_err(), "{}", body);
        }
    }

    #[test]
    fn rejects_addresses_wider_than_the_email_column() {
        // 64-char local part and 194-char domain: syntactically valid.
        let long = format!(
            "{}@{}.{}.{}.example.com",
            "b".repeat(64),
            "a".repeat(60),
            "a".repeat(60),
            "a".repeat(60)
        );
        assert!(long.len() > 255);

        let req = request(serde_json::json!({ "username": "alice", "email": long }));
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));

        let req = request(serde_json::json!({
            "username": "alice",
            "email": format!("{}@example.com", "b".repeat(64))
        }));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn notify_address_requires_opt_in() {
        let req = request(serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "send_email": true
        }));
        assert_eq!(req.notify_address(), Some("alice@example.com"));

        let req = request(serde_json::json!({
            "username": "alice",
            "email": "alice@example.com"
        }));
        assert_eq!(req.notify_address(), None);
    }

    #[test]
    fn token_data_derives_status() {
        let now = Utc::now();
        let token = EnrollmentToken {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            token: "TAK-abcdefghijklmnopqr-ENR".to_string(),
            group_name: "__ANON__".to_string(),
            email: None,
            notes: None,
            created_at: now - Duration::minutes(90),
            expires_at: now - Duration::minutes(30),
            enrolled: false,
            revoked: false,
            certificate_issued_at: None,
            package_path: Some("/app/packages/enroll-alice.zip".to_string()),
        };

        let data = TokenData::from_token(token, now);
        assert!(data.is_expired);
        assert!(!data.is_valid);
        assert!(data.has_package);

        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("package_path").is_none());
    }
}
