use axum::http::{header, HeaderMap};

use crate::error::ApiError;

/// Check the `Authorization: Bearer <token>` header against the configured
/// admin token. No configured token means the check is disabled.
pub fn require_admin(headers: &HeaderMap, admin_token: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = admin_token.filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => {
            tracing::warn!("Rejected upload with invalid admin token");
            Err(ApiError::Unauthorized("invalid admin token".to_string()))
        }
        None => Err(ApiError::Unauthorized("admin token required".to_string())),
    }
}
