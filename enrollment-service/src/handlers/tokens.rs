use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use crate::dtos::{
    CreateTokenRequest, CreateTokenResponse, ListTokensQuery, StatsResponse, TokenData,
    TokenListResponse, TokenResponse,
};
use crate::models::TokenFilter;
use crate::services::EnrollmentNotice;
use crate::utils::{generate_qr_png, ValidatedJson};
use crate::AppState;

fn qr_url(public_url: &str, username: &str) -> String {
    format!("{}/api/tokens/{}/qr", public_url, username)
}

fn package_url(public_url: &str, username: &str) -> String {
    format!("{}/api/tokens/{}/package", public_url, username)
}

/// Create a token, build its package, and optionally mail the holder.
///
/// A package failure is reported as an error, but the token stays; the
/// package can be rebuilt with `POST /api/tokens/{username}/package`.
#[tracing::instrument(skip(state, req), fields(username = %req.username))]
pub async fn create_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreateTokenResponse>), AppError> {
    let created = state.tokens.create_token(req.to_input()).await?;
    let token = state.tokens.build_package(&created.username).await?;

    let notification = match req.notify_address() {
        Some(email) => {
            let public_url = &state.config.public_url;
            let notice = EnrollmentNotice {
                username: &token.username,
                email,
                token: &token.token,
                expires_at: token.expires_at,
                qr_url: qr_url(public_url, &token.username),
                package_url: package_url(public_url, &token.username),
            };
            Some(state.notifier.notify(&notice).await)
        }
        None => None,
    };

    let now = state.tokens.now();
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            success: true,
            token_data: TokenData::from_token(token, now),
            notification,
        }),
    ))
}

pub async fn get_token(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.tokens.get_token(&username).await?;
    Ok(Json(TokenResponse {
        success: true,
        token_data: TokenData::from_token(token, state.tokens.now()),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.tokens.revoke_token(&username).await?;
    Ok(Json(TokenResponse {
        success: true,
        token_data: TokenData::from_token(token, state.tokens.now()),
    }))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Query(query): Query<ListTokensQuery>,
) -> Result<Json<TokenListResponse>, AppError> {
    let filter = match query.filter.as_deref() {
        Some(raw) => raw
            .parse::<TokenFilter>()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
        None => TokenFilter::All,
    };

    let tokens = state.tokens.list_tokens(filter).await?;
    let now = state.tokens.now();
    Ok(Json(TokenListResponse {
        success: true,
        tokens: tokens
            .into_iter()
            .map(|t| TokenData::from_token(t, now))
            .collect(),
    }))
}

pub async fn get_statistics(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.tokens.get_statistics().await?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

/// PNG QR code pointing at the package download URL.
pub async fn qr_code(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let token = state.tokens.get_token(&username).await?;
    let png = generate_qr_png(&package_url(&state.config.public_url, &token.username))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

pub async fn download_package(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let path = state.tokens.package_file(&username).await?;
    let bytes = tokio::fs::read(&path).await?;

    let disposition = format!("attachment; filename=\"enroll-{}.zip\"", username);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Rebuild the package for the existing token without touching the token.
#[tracing::instrument(skip(state))]
pub async fn rebuild_package(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.tokens.build_package(&username).await?;
    Ok(Json(TokenResponse {
        success: true,
        token_data: TokenData::from_token(token, state.tokens.now()),
    }))
}
