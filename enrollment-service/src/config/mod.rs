use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Base URL embedded in QR codes and notification links.
    pub public_url: String,
    pub database: DatabaseConfig,
    pub tak: TakServerConfig,
    pub packages: PackageConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Connection details written into every client preference file.
#[derive(Debug, Clone, Deserialize)]
pub struct TakServerConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub truststore_path: PathBuf,
    pub truststore_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    pub root_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<Secret<String>>,
    pub from_email: Option<String>,
    pub from_name: String,
    pub timeout_seconds: u64,
}

impl SmtpConfig {
    /// Mail is only attempted when both transport credentials are present.
    pub fn is_configured(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }

    /// Sender address, falling back to the transport username.
    pub fn sender(&self) -> Option<&str> {
        self.from_email.as_deref().or(self.user.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl EnrollmentConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = EnrollmentConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("enrollment-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            public_url: get_env("PUBLIC_URL", Some("http://localhost:5000"), is_prod)?
                .trim_end_matches('/')
                .to_string(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            tak: TakServerConfig {
                host: get_env("TAK_SERVER_HOST", Some("10.123.123.2"), is_prod)?,
                port: parse_env("TAK_SERVER_PORT", "8089", is_prod)?,
                protocol: get_env("TAK_SERVER_PROTOCOL", Some("ssl"), false)?,
                truststore_path: get_env(
                    "TRUSTSTORE_PATH",
                    Some("/app/config/truststore-root.p12"),
                    false,
                )?
                .into(),
                truststore_password: get_env("TRUSTSTORE_PASSWORD", Some("atakatak"), false)?,
            },
            packages: PackageConfig {
                root_dir: get_env("PACKAGES_DIR", Some("/app/packages"), false)?.into(),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_SERVER", Some("smtp.gmail.com"), false)?,
                port: parse_env("SMTP_PORT", "587", false)?,
                user: get_optional_env("SMTP_USER"),
                password: get_optional_env("SMTP_PASSWORD").map(Secret::new),
                from_email: get_optional_env("FROM_EMAIL"),
                from_name: get_env("FROM_NAME", Some("TAK Admin"), false)?,
                timeout_seconds: parse_env("SMTP_TIMEOUT_SECONDS", "10", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("*"), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "APP__PORT must be greater than 0"
            )));
        }

        if self.smtp.timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            tracing::warn!("Wildcard CORS origin configured in production");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(user: Option<&str>, password: Option<&str>) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: user.map(str::to_string),
            password: password.map(|p| Secret::new(p.to_string())),
            from_email: None,
            from_name: "TAK Admin".to_string(),
            timeout_seconds: 10,
        }
    }

    #[test]
    fn smtp_requires_both_credentials() {
        assert!(smtp(Some("ops@example.com"), Some("secret")).is_configured());
        assert!(!smtp(Some("ops@example.com"), None).is_configured());
        assert!(!smtp(None, Some("secret")).is_configured());
    }

    #[test]
    fn sender_falls_back_to_transport_user() {
        let mut config = smtp(Some("ops@example.com"), Some("secret"));
        assert_eq!(config.sender(), Some("ops@example.com"));

        config.from_email = Some("tak@example.com".to_string());
        assert_eq!(config.sender(), Some("tak@example.com"));
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn get_env_uses_default_outside_prod() {
        let value = get_env("ENROLLMENT_TEST_UNSET_KEY", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
        assert!(get_env("ENROLLMENT_TEST_UNSET_KEY", Some("fallback"), true).is_err());
        assert!(get_env("ENROLLMENT_TEST_UNSET_KEY", None, false).is_err());
    }
}
