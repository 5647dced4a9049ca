//! Failures raised while authenticating and authorizing a request
//!
//! Every stage of the pipeline reports an [`AuthError`]. At the edge of the
//! core each one is flattened into an [`AuthorizationError`], the uniform
//! `{code, description, status}` value that the HTTP layer renders.

use std::{borrow::Cow, error::Error as StdError};

use serde::Serialize;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// HTTP status used for authentication failures
pub const UNAUTHORIZED: u16 = 401;

/// HTTP status used for authorization failures
pub const FORBIDDEN: u16 = 403;

/// A failure to fetch or parse the provider's key document
#[derive(Debug, Error)]
pub enum KeyFetchError {
    /// The request could not be sent or the response could not be read
    #[error("key document request failed")]
    Request(#[source] BoxError),

    /// The request did not complete within the configured timeout
    #[error("key document request timed out")]
    Timeout,

    /// The provider answered with a non-success status
    #[error("key document request returned status {status}")]
    Status {
        /// The HTTP status code returned by the provider
        status: u16,
    },

    /// The response body was not a key set
    #[error("key document is malformed")]
    Malformed(#[source] BoxError),
}

impl KeyFetchError {
    pub(crate) fn request(source: impl Into<BoxError>) -> Self {
        Self::Request(source.into())
    }

    pub(crate) fn malformed(source: impl Into<BoxError>) -> Self {
        Self::Malformed(source.into())
    }
}

/// The reason a request was refused
///
/// Each kind is kept distinct so that logs can tell an attack signature
/// (a bad signature) apart from operational noise (an expired token, a
/// stale key cache).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization` header was sent
    #[error("authorization header is expected")]
    MissingHeader,

    /// The header is not `<scheme> <token>`
    #[error("authorization header must be a bearer token")]
    MalformedHeader,

    /// The header uses a scheme other than `bearer`
    #[error("authorization header must start with \"Bearer\"")]
    InvalidHeaderScheme,

    /// The header names the bearer scheme but carries no token
    #[error("token not found")]
    EmptyToken,

    /// The token is not three decodable segments
    #[error("token is malformed")]
    MalformedToken(#[source] Option<BoxError>),

    /// The token header names an algorithm other than the mandated one
    #[error("token algorithm '{alg}' is not accepted")]
    UnsupportedAlgorithm {
        /// The algorithm named by the token header
        alg: String,
    },

    /// No usable key could be selected for the token
    #[error("token signing key is unusable: {reason}")]
    InvalidKey {
        /// Why the key cannot be used
        reason: &'static str,
    },

    /// The signature does not match the header and payload
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The payload lacks a required claim or holds a claim of the wrong type
    #[error("token claims are malformed")]
    MalformedClaims(#[source] BoxError),

    /// The `exp` claim is not in the future
    #[error("token expired")]
    TokenExpired,

    /// The `iss` claim does not name the expected issuer
    #[error("incorrect issuer")]
    InvalidIssuer,

    /// The `aud` claim does not include the expected audience
    #[error("incorrect audience")]
    InvalidAudience,

    /// The provider's key set has no key with the token's identifier
    #[error("no signing key found for key id '{kid}'")]
    KeyNotFound {
        /// The key identifier named by the token header
        kid: String,
    },

    /// The provider's key set could not be fetched
    #[error("unable to fetch signing keys")]
    KeyFetchError(#[from] KeyFetchError),

    /// The claims carry no `permissions` field
    #[error("permissions not included in token")]
    MissingPermissionsClaim,

    /// The `permissions` claim lacks the required permission
    #[error("permission '{required}' not granted")]
    PermissionDenied {
        /// The permission the operation requires
        required: String,
    },
}

impl AuthError {
    pub(crate) fn malformed_token(source: impl Into<BoxError>) -> Self {
        Self::MalformedToken(Some(source.into()))
    }

    pub(crate) fn malformed_claims(source: impl Into<BoxError>) -> Self {
        Self::MalformedClaims(source.into())
    }

    /// The machine-readable code for this failure
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidHeaderScheme => "invalid_header_scheme",
            Self::EmptyToken => "empty_token",
            Self::MalformedToken(_) => "malformed_token",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::InvalidKey { .. } => "invalid_key",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedClaims(_) => "malformed_claims",
            Self::TokenExpired => "token_expired",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::KeyFetchError(_) => "key_fetch_error",
            Self::MissingPermissionsClaim => "missing_permissions_claim",
            Self::PermissionDenied { .. } => "permission_denied",
        }
    }

    /// The HTTP status family for this failure
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingPermissionsClaim | Self::PermissionDenied { .. } => FORBIDDEN,
            _ => UNAUTHORIZED,
        }
    }
}

/// A structured refusal, ready to be rendered as a response
///
/// Collaborators outside the token pipeline (a missing record, an
/// undecodable body) build the same value through [`not_found`],
/// [`bad_request`] and [`unprocessable`] so that every failure leaves the
/// service in one shape.
///
///   [`not_found`]: AuthorizationError::not_found
///   [`bad_request`]: AuthorizationError::bad_request
///   [`unprocessable`]: AuthorizationError::unprocessable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {description}")]
#[must_use]
pub struct AuthorizationError {
    code: Cow<'static, str>,
    description: Cow<'static, str>,
    #[serde(rename = "error")]
    status: u16,
}

impl AuthorizationError {
    /// Constructs an error from its parts
    pub fn new(
        code: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        status: u16,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            status,
        }
    }

    /// The requested resource does not exist (404)
    pub fn not_found(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new("not_found", description, 404)
    }

    /// The request cannot be served as sent (400)
    pub fn bad_request(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new("bad_request", description, 400)
    }

    /// The request body could not be understood (422)
    pub fn unprocessable(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new("unprocessable", description, 422)
    }

    /// The machine-readable code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The human-readable description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The HTTP status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the caller failed to prove who they are
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        self.status == UNAUTHORIZED
    }

    /// Whether the caller is known but lacks a grant
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.status == FORBIDDEN
    }
}

impl From<AuthError> for AuthorizationError {
    fn from(err: AuthError) -> Self {
        Self::new(err.code(), err.to_string(), err.status())
    }
}
