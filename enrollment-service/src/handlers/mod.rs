pub mod health;
pub mod metrics;
pub mod tokens;

pub use health::health_check;
