//! Users as identified by the API gateway in front of us.
//!
//! The gateway authenticates the caller and forwards their claims as
//! base64-encoded JSON in the `X-Userinfo` header.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use crate::domain::aggregates::{User, UserInfo};
use crate::services::Services;
use super::error::ApiError;

pub const USERINFO_HEADER: &str = "x-userinfo";

/// The authenticated caller.
pub struct CurrentUser(pub User);

/// The authenticated caller, who must be staff.
pub struct StaffUser(pub User);

pub fn decode_userinfo(value: &str) -> Option<UserInfo> {
    let value = value.trim();
    let bytes = STANDARD.decode(value).or_else(|_| URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Client address, preferring what the proxy saw.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl FromRequestParts<Services> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, services: &Services) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(USERINFO_HEADER).and_then(|v| v.to_str().ok()).ok_or(ApiError::Unauthenticated)?;
        let info = decode_userinfo(header).ok_or(ApiError::Unauthenticated)?;
        Ok(Self(services.resolve_user(&info).await?))
    }
}

#[async_trait]
impl FromRequestParts<Services> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, services: &Services) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, services).await?;
        Services::require_staff(&user)?;
        Ok(Self(user))
    }
}
