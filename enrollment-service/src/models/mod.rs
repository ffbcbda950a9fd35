pub mod audit_log;
pub mod enrollment_token;

pub use audit_log::{AuditAction, AuditLog};
pub use enrollment_token::{EnrollmentToken, NewEnrollmentToken, TokenFilter, TokenStatistics};
