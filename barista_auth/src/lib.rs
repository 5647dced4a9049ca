//! Bearer token authentication and permission authorization
//!
//! An [`Authority`] is the single guard in front of protected operations.
//! Given the value of an `Authorization` header and the permission an
//! operation requires, it either returns the token's validated [`Claims`] or
//! an [`AuthorizationError`] describing why the request was refused:
//!
//! 1. the bearer token is extracted from the header ([`extract_bearer`]),
//! 2. its signature is verified with a key from the provider's published key
//!    set, fetched and cached by a [`KeyResolver`],
//! 3. its claims are checked for expiry, issuer and audience
//!    ([`TokenValidator`]),
//! 4. its `permissions` claim is checked for the required permission
//!    ([`require_permission`]).
//!
//! Failures at the first three stages are authentication failures (401);
//! failures at the last are authorization failures (403).
//!
//! # Feature flags
//!
//! * `rustls-tls` (default) and `default-tls` choose the TLS backend used to
//!   fetch key sets.
//! * `test-util` exposes the [`testing`] module so dependent crates can mint
//!   tokens signed by the fixture keys.

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

mod authority;
pub mod claims;
mod config;
pub mod error;
pub mod jwa;
pub mod jwks;
pub mod jwt;
pub mod permission;
mod remote;
mod resolver;
mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use authority::{Authority, MIN_REFRESH_INTERVAL};
pub use claims::Claims;
pub use config::AuthConfig;
pub use error::{AuthError, AuthorizationError, KeyFetchError};
pub use jwa::Algorithm;
pub use jwks::{KeyId, KeyIdRef, KeySet, SigningKey};
pub use jwt::{extract_bearer, Jwt, JwtRef};
pub use permission::{require_permission, Permission, PermissionRef, Permissions};
pub use remote::{RemoteKeySource, DEFAULT_FETCH_TIMEOUT};
pub use resolver::{Fetched, KeyResolver, KeySource, StaticKeySource};
pub use validator::TokenValidator;
