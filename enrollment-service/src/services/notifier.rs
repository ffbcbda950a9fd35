//! Enrollment notice delivery.
//!
//! Delivery is single-shot and never fails the caller: every outcome comes
//! back as a [`NotificationOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::SmtpConfig;
use crate::services::metrics::NOTIFICATIONS_TOTAL;
use crate::services::providers::{EmailMessage, EmailProvider, ProviderError, SmtpProvider};

pub const NOT_CONFIGURED: &str = "Email not configured";

/// Everything the notice mentions.
#[derive(Debug, Clone)]
pub struct EnrollmentNotice<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub token: &'a str,
    pub expires_at: DateTime<Utc>,
    pub qr_url: String,
    pub package_url: String,
}

impl EnrollmentNotice<'_> {
    pub fn subject(&self) -> String {
        format!("TAK Enrollment - {}", self.username)
    }

    pub fn body(&self) -> String {
        format!(
            "TAK Server Enrollment\n\
             \n\
             Username: {}\n\
             Password: {}\n\
             Expires: {}\n\
             \n\
             Download: {}\n\
             Scan: {}\n\
             \n\
             ShadowMoses Command Center",
            self.username,
            self.token,
            self.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.package_url,
            self.qr_url,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Sends enrollment notices through an optional provider.
///
/// Whether mail is configured is fixed when the notifier is built.
#[derive(Clone)]
pub struct EnrollmentNotifier {
    provider: Option<Arc<dyn EmailProvider>>,
    timeout: Duration,
}

impl EnrollmentNotifier {
    pub fn new(provider: Option<Arc<dyn EmailProvider>>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(10))
    }

    /// Build from SMTP settings. Missing credentials or an unusable relay
    /// leave the notifier disabled.
    pub fn from_config(config: &SmtpConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds);
        if !config.is_configured() {
            info!("SMTP credentials not set, enrollment emails disabled");
            return Self::new(None, timeout);
        }

        match SmtpProvider::new(config) {
            Ok(provider) => {
                info!(server = %config.host, port = config.port, "SMTP email provider initialized");
                Self::new(Some(Arc::new(provider)), timeout)
            }
            Err(e) => {
                warn!(error = %e, "SMTP provider unavailable, enrollment emails disabled");
                Self::new(None, timeout)
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&Arc<dyn EmailProvider>> {
        self.provider.as_ref()
    }

    #[instrument(skip(self, notice), fields(username = %notice.username))]
    pub async fn notify(&self, notice: &EnrollmentNotice<'_>) -> NotificationOutcome {
        let Some(provider) = &self.provider else {
            NOTIFICATIONS_TOTAL.with_label_values(&["disabled"]).inc();
            return NotificationOutcome::failed(NOT_CONFIGURED);
        };

        let message = EmailMessage {
            to: notice.email.to_string(),
            subject: notice.subject(),
            body_text: notice.body(),
        };

        let result = match tokio::time::timeout(self.timeout, provider.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
        };

        match result {
            Ok(_) => {
                NOTIFICATIONS_TOTAL.with_label_values(&["sent"]).inc();
                info!("Enrollment email sent");
                NotificationOutcome::sent()
            }
            Err(e) => {
                NOTIFICATIONS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(error = %e, "Enrollment email failed");
                NotificationOutcome::failed(e.to_string())
            }
        }
    }
}
