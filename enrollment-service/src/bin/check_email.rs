//! Report whether enrollment mail is configured and, with `--probe`, whether
//! the relay accepts a connection.

use enrollment_service::{config::EnrollmentConfig, services::EnrollmentNotifier};
use service_core::error::AppError;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    let config = EnrollmentConfig::from_env()?;
    let probe = std::env::args().any(|arg| arg == "--probe");

    let notifier = EnrollmentNotifier::from_config(&config.smtp);
    let Some(provider) = notifier.provider() else {
        println!("Email service not configured");
        println!("   Set SMTP_USER and SMTP_PASSWORD in .env");
        return Ok(ExitCode::FAILURE);
    };

    println!("Email service configured");
    println!("   Server: {}:{}", config.smtp.host, config.smtp.port);
    println!("   From: {}", config.smtp.sender().unwrap_or("-"));

    if probe {
        match provider.health_check().await {
            Ok(()) => println!("   Relay accepted connection"),
            Err(e) => {
                println!("   Relay check failed: {}", e);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
