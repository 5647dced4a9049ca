//! Axum extractors that put a `barista_auth` [`Authority`] in front of
//! handlers, and the error response every refusal is rendered as.
//!
//! # Example
//!
//! ```no_run
//! use barista_auth::{AuthConfig, Authority};
//! use axum::{routing::{get, post}, Router};
//!
//! mod permission {
//!     barista_axum::permission_guards! {
//!         pub permission Authenticated = *;
//!         pub permission ReadDetail = "get:drinks-detail";
//!         pub permission CreateDrink = "post:drinks";
//!     }
//! }
//!
//! async fn whoami(permission::Authenticated(claims): permission::Authenticated) -> String {
//!     claims.sub().to_string()
//! }
//!
//! async fn create(_: permission::CreateDrink) -> &'static str {
//!     "created"
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::auth0("barista.us.auth0.com", "drinks".to_owned());
//!     let authority = Authority::from_config(&config)?;
//!
//!     let router = Router::new()
//!         .route("/whoami", get(whoami))
//!         .route("/drinks", post(create))
//!         .with_state(authority);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```
//!
//! Any state type works as long as the [`Authority`] can be taken from it
//! with [`FromRef`](axum_core::extract::FromRef).

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error::Error, fmt};

use axum_core::response::{IntoResponse, Response};
use barista_auth::{AuthError, AuthorizationError, PermissionRef};
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;

mod macros;
pub mod util;

/// The permission an endpoint guard demands
pub trait EndpointPermission {
    /// The permission the bearer token must grant, or `None` if any valid
    /// token is accepted
    fn required_permission() -> Option<&'static PermissionRef>;
}

/// A refused request, rendered as a JSON error response
///
/// ```json
/// {"success": false, "error": 403, "code": "permission_denied", "message": "permission 'post:drinks' not granted"}
/// ```
///
/// 401 responses also carry an `invalid_token` challenge and 403 responses an
/// `insufficient_scope` one. See [`util`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ApiError {
    error: AuthorizationError,
    permission: Option<&'static PermissionRef>,
}

impl ApiError {
    /// Names the permission that was required, for the `scope` of the
    /// challenge
    pub fn with_permission(mut self, permission: Option<&'static PermissionRef>) -> Self {
        self.permission = permission;
        self
    }

    /// The underlying error
    pub fn error(&self) -> &AuthorizationError {
        &self.error
    }

    /// Unwraps the underlying error
    pub fn into_inner(self) -> AuthorizationError {
        self.error
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(error: AuthorizationError) -> Self {
        Self {
            error,
            permission: None,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        AuthorizationError::from(error).into()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: u16,
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorBody {
            success: false,
            error: status.as_u16(),
            code: self.error.code(),
            message: self.error.description(),
        };

        let mut response = match serde_json::to_vec(&body) {
            Ok(bytes) => (status, bytes).into_response(),
            Err(_) => return status.into_response(),
        };

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        match status {
            StatusCode::UNAUTHORIZED => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    util::invalid_token(self.error.description()),
                );
            }
            StatusCode::FORBIDDEN => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    util::insufficient_scope(self.error.description(), self.permission),
                );
            }
            _ => {}
        }

        response
    }
}

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
    pub use axum_core::extract::{FromRef, FromRequestParts};
    pub use barista_auth::{Authority, Claims, PermissionRef};
    pub use http::request::Parts;

    use barista_auth::{require_permission, AuthError};
    use http::header;

    use crate::ApiError;

    /// Claims already accepted for this request, so that stacked guards
    /// validate the token once
    #[derive(Clone, Debug)]
    struct ValidatedClaims(Claims);

    /// Runs the guard for one extractor
    pub async fn from_request(
        parts: &mut Parts,
        authority: &Authority,
        required: Option<&'static PermissionRef>,
    ) -> Result<Claims, ApiError> {
        let refuse = |err: barista_auth::AuthorizationError| ApiError::from(err).with_permission(required);

        if let Some(ValidatedClaims(claims)) = parts.extensions.get::<ValidatedClaims>() {
            if let Some(permission) = required {
                require_permission(claims, permission).map_err(|err| {
                    tracing::debug!(%permission, auth.code = err.code(), "permission not granted");
                    ApiError::from(err).with_permission(required)
                })?;
            }
            return Ok(claims.clone());
        }

        let header = match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| {
                tracing::debug!(auth.code = "malformed_header", "authorization header is not ASCII");
                ApiError::from(AuthError::MalformedHeader)
            })?),
            None => None,
        };

        let claims = match required {
            Some(permission) => authority.authorize(header, permission).await,
            None => authority.authenticate(header).await,
        }
        .map_err(refuse)?;

        parts
            .extensions
            .insert(ValidatedClaims(claims.clone()));

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use axum_core::body::Body;
    use color_eyre::Result;

    use super::*;

    async fn render(err: ApiError) -> Result<(Response, serde_json::Value)> {
        let response = err.into_response();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await?;
        let json = serde_json::from_slice(&bytes)?;
        Ok((Response::from_parts(parts, Body::empty()), json))
    }

    #[tokio::test]
    async fn renders_the_json_error_body() -> Result<()> {
        let (response, body) = render(AuthError::TokenExpired.into()).await?;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "error": 401,
                "code": "token_expired",
                "message": "token expired",
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_carries_an_invalid_token_challenge() -> Result<()> {
        let (response, _) = render(AuthError::MissingHeader.into()).await?;

        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="invalid_token" error_description="authorization header is expected""#
        );
        Ok(())
    }

    #[tokio::test]
    async fn forbidden_names_the_required_permission() -> Result<()> {
        let required = PermissionRef::from_static("delete:drinks");
        let err = ApiError::from(AuthError::PermissionDenied {
            required: required.to_string(),
        })
        .with_permission(Some(required));

        let (response, body) = render(err).await?;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="insufficient_scope" error_description="permission 'delete:drinks' not granted" scope="delete:drinks""#
        );
        assert_eq!(body["code"], "permission_denied");
        Ok(())
    }

    #[tokio::test]
    async fn collaborator_errors_have_no_challenge() -> Result<()> {
        let (response, body) = render(AuthorizationError::not_found("drink 7 not found").into()).await?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert_eq!(body["error"], 404);
        assert_eq!(body["code"], "not_found");
        assert_eq!(body["message"], "drink 7 not found");
        Ok(())
    }
}
