use service_core::error::AppError;
use thiserror::Error;

use super::package::PackageError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Active token exists for {0}")]
    ActiveTokenExists(String),

    #[error("No token found for {0}")]
    TokenNotFound(String),

    #[error("No package generated for {0}")]
    PackageNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Package error: {0}")]
    Packaging(#[from] PackageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            // Conflicts are reported as 400, which existing clients expect.
            ServiceError::ActiveTokenExists(_) => {
                AppError::BadRequest(anyhow::anyhow!("Active token exists"))
            }
            ServiceError::TokenNotFound(username) => {
                AppError::NotFound(anyhow::anyhow!("No token found for {}", username))
            }
            ServiceError::PackageNotFound(_) => AppError::NotFound(anyhow::anyhow!("Not found")),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Packaging(e) => AppError::PackageError(e.to_string()),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
