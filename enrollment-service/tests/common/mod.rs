//! Common test utilities for enrollment-service integration tests.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use enrollment_service::config::{
    DatabaseConfig, EnrollmentConfig, Environment, PackageConfig, SecurityConfig, SmtpConfig,
    TakServerConfig,
};
use enrollment_service::services::providers::MockEmailProvider;
use enrollment_service::services::{
    EnrollmentNotifier, InMemoryTokenStore, ManualClock, PackageBuilder, TokenService,
};
use enrollment_service::{build_router, AppState};
use serde_json::Value;
use service_core::config::Config as CommonConfig;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const PUBLIC_URL: &str = "http://enroll.test";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,enrollment_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
}

pub fn test_config(packages_dir: &Path) -> EnrollmentConfig {
    EnrollmentConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "enrollment-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        public_url: PUBLIC_URL.to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        tak: TakServerConfig {
            host: "10.123.123.2".to_string(),
            port: 8089,
            protocol: "ssl".to_string(),
            truststore_path: packages_dir.join("no-truststore.p12"),
            truststore_password: "atakatak".to_string(),
        },
        packages: PackageConfig {
            root_dir: packages_dir.to_path_buf(),
        },
        smtp: SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: None,
            password: None,
            from_email: None,
            from_name: "TAK Admin".to_string(),
            timeout_seconds: 5,
        },
        security: SecurityConfig {
            allowed_origins: vec!["*".to_string()],
        },
    }
}

/// Router over the in-memory store with a controllable clock.
pub struct TestApp {
    pub router: Router,
    /// Shares the router's store and clock, for operations with no route.
    pub tokens: TokenService,
    pub clock: ManualClock,
    pub store: Arc<InMemoryTokenStore>,
    pub mailer: Option<Arc<MockEmailProvider>>,
    pub packages: TempDir,
}

/// Spawn an app with mail disabled.
pub fn spawn_app() -> TestApp {
    build_app(None)
}

/// Spawn an app whose notices go to `mailer`.
pub fn spawn_app_with_mailer(mailer: MockEmailProvider) -> TestApp {
    build_app(Some(Arc::new(mailer)))
}

fn build_app(mailer: Option<Arc<MockEmailProvider>>) -> TestApp {
    init_tracing();

    let packages = TempDir::new().expect("Failed to create packages dir");
    let config = test_config(packages.path());
    let clock = ManualClock::new(start_time());
    let store = Arc::new(InMemoryTokenStore::new());

    let tokens = TokenService::new(
        store.clone(),
        Arc::new(clock.clone()),
        PackageBuilder::new(config.tak.clone(), config.packages.clone()),
    );
    let notifier = match &mailer {
        Some(m) => EnrollmentNotifier::new(Some(m.clone()), Duration::from_secs(5)),
        None => EnrollmentNotifier::disabled(),
    };

    let router = build_router(AppState {
        config: Arc::new(config),
        tokens: tokens.clone(),
        notifier,
    });

    TestApp {
        router,
        tokens,
        clock,
        store,
        mailer,
        packages,
    }
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        TestResponse {
            status,
            content_type,
            bytes,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> TestResponse {
        self.request(Method::POST, uri, None).await
    }

    /// Create a token over HTTP and return the `token_data` object.
    pub async fn create_token(&self, username: &str, expiry_minutes: i64) -> Value {
        let response = self
            .post(
                "/api/tokens",
                serde_json::json!({ "username": username, "expiry_minutes": expiry_minutes }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
        response.json()["token_data"].clone()
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).expect("response body is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}
