//! Enrollment token record and the status derived from it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Group assigned when the caller does not name one.
pub const DEFAULT_GROUP: &str = "__ANON__";

/// Expiry used when the caller does not ask for one.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 120;

/// One row of `enrollment_tokens`.
///
/// Status flags are stored; `expired` and `valid` are always derived against
/// a caller-supplied instant and never persisted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EnrollmentToken {
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
    pub package_path: Option<String>,
}

impl EnrollmentToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Usable for enrollment: not expired, not yet consumed, not revoked.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.enrolled && !self.revoked
    }

    /// A live record blocks creation of another token for the same username,
    /// whatever its enrolled/revoked flags say.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now)
    }
}

/// Input for inserting a fresh token.
#[derive(Debug, Clone)]
pub struct NewEnrollmentToken {
    pub username: String,
    pub token: String,
    pub group_name: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewEnrollmentToken {
    /// `None` when `now + expiry_minutes` is not a representable instant.
    pub fn new(
        username: String,
        token: String,
        group_name: String,
        expiry_minutes: i64,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let expires_at = Duration::try_minutes(expiry_minutes)
            .and_then(|expiry| now.checked_add_signed(expiry))?;

        Some(Self {
            username,
            token,
            group_name,
            email: None,
            notes: None,
            created_at: now,
            expires_at,
        })
    }

    pub fn into_record(self, id: Uuid) -> EnrollmentToken {
        EnrollmentToken {
            id,
            username: self.username,
            token: self.token,
            group_name: self.group_name,
            email: self.email,
            notes: self.notes,
            created_at: self.created_at,
            expires_at: self.expires_at,
            enrolled: false,
            revoked: false,
            certificate_issued_at: None,
            package_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFilter {
    #[default]
    All,
    /// Unexpired records only. Enrolled and revoked records are still listed.
    Active,
}

impl std::str::FromStr for TokenFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(TokenFilter::All),
            "active" => Ok(TokenFilter::Active),
            _ => Err(format!("Invalid filter: {}. Must be one of: all, active", s)),
        }
    }
}

/// Aggregate counts. The buckets overlap: a revoked token is also counted as
/// active or expired, and `enrolled` ignores expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow, Serialize, Deserialize)]
pub struct TokenStatistics {
    pub total: i64,
    pub active: i64,
    pub enrolled: i64,
    pub expired: i64,
    pub revoked: i64,
}

impl TokenStatistics {
    /// Fold one record into the counts as of `now`.
    pub fn record(&mut self, token: &EnrollmentToken, now: DateTime<Utc>) {
        self.total += 1;
        if token.expires_at > now && !token.enrolled {
            self.active += 1;
        }
        if token.enrolled {
            self.enrolled += 1;
        }
        if token.expires_at < now && !token.enrolled {
            self.expired += 1;
        }
        if token.revoked {
            self.revoked += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in_minutes: i64, now: DateTime<Utc>) -> EnrollmentToken {
        NewEnrollmentToken::new(
            "alice".to_string(),
            "TAK-abcdefghijklmnopqr-ENR".to_string(),
            DEFAULT_GROUP.to_string(),
            expires_in_minutes,
            now,
        )
        .unwrap()
        .into_record(Uuid::new_v4())
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let now = Utc::now();
        let t = token(60, now);
        assert!(!t.is_expired_at(now));
        assert!(!t.is_expired_at(t.expires_at));
        assert!(t.is_expired_at(t.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn valid_requires_unexpired_unenrolled_unrevoked() {
        let now = Utc::now();
        let mut t = token(60, now);
        assert!(t.is_valid_at(now));

        t.revoked = true;
        assert!(!t.is_valid_at(now));
        assert!(t.is_live_at(now));

        t.revoked = false;
        t.enrolled = true;
        assert!(!t.is_valid_at(now));

        t.enrolled = false;
        assert!(!t.is_valid_at(now + Duration::minutes(61)));
    }

    #[test]
    fn new_token_expires_after_requested_minutes() {
        let now = Utc::now();
        let t = token(45, now);
        assert_eq!(t.expires_at - t.created_at, Duration::minutes(45));
        assert!(!t.enrolled && !t.revoked);
        assert!(t.package_path.is_none());
    }

    #[test]
    fn out_of_range_expiry_yields_none() {
        let now = Utc::now();
        for minutes in [i64::MAX, i64::MIN, 1_000_000_000_000] {
            assert!(NewEnrollmentToken::new(
                "alice".to_string(),
                "TAK-abcdefghijklmnopqr-ENR".to_string(),
                DEFAULT_GROUP.to_string(),
                minutes,
                now,
            )
            .is_none());
        }
    }

    #[test]
    fn statistics_buckets_overlap_like_the_reporting_model() {
        let now = Utc::now();
        let mut enrolled_expired = token(-10, now);
        enrolled_expired.enrolled = true;
        let active = token(60, now);
        let mut revoked_active = token(60, now);
        revoked_active.revoked = true;

        let mut stats = TokenStatistics::default();
        for t in [&enrolled_expired, &active, &revoked_active] {
            stats.record(t, now);
        }

        assert_eq!(
            stats,
            TokenStatistics {
                total: 3,
                active: 2,
                enrolled: 1,
                expired: 0,
                revoked: 1,
            }
        );
    }

    #[test]
    fn filter_parses_known_values() {
        assert_eq!("active".parse::<TokenFilter>().unwrap(), TokenFilter::Active);
        assert_eq!("ALL".parse::<TokenFilter>().unwrap(), TokenFilter::All);
        assert!("revoked".parse::<TokenFilter>().is_err());
    }
}
