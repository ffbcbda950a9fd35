pub mod clock;
pub mod database;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod package;
pub mod providers;
pub mod store;
pub mod tokens;

pub use clock::{Clock, ManualClock, SystemClock};
pub use database::PgTokenStore;
pub use error::ServiceError;
pub use notifier::{EnrollmentNotice, EnrollmentNotifier, NotificationOutcome};
pub use package::{PackageBuilder, PackageError, PackageRequest};
pub use store::{InMemoryTokenStore, TokenStore};
pub use tokens::{sweep_expired_tokens, CreateTokenInput, TokenService};
