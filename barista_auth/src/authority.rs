use std::{fmt, sync::Arc, time::Duration};

use barista_clock::{Clock, System};
use tokio::task::JoinHandle;

use crate::{
    claims::Claims,
    config::AuthConfig,
    error::{AuthError, AuthorizationError, KeyFetchError},
    jwt,
    permission::{self, PermissionRef},
    remote::RemoteKeySource,
    resolver::KeyResolver,
    validator::TokenValidator,
};

/// The shortest period between background key refreshes
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct Inner {
    keys: KeyResolver,
    validator: TokenValidator,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("keys", &self.keys)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

/// The guard in front of protected operations
///
/// An authority owns the key cache and the validation policy. It is cheap to
/// clone; clones share the same cache.
#[derive(Debug, Clone)]
#[must_use]
pub struct Authority {
    inner: Arc<Inner>,
}

impl Authority {
    /// Constructs an authority that judges expiry by the system clock
    pub fn new(validator: TokenValidator, keys: KeyResolver) -> Self {
        Self::new_with_clock(validator, keys, System)
    }

    /// Constructs an authority that judges expiry by `clock`
    pub fn new_with_clock(
        validator: TokenValidator,
        keys: KeyResolver,
        clock: impl Clock + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys,
                validator,
                clock: Arc::new(clock),
            }),
        }
    }

    /// Constructs an authority that fetches keys from the configured URL
    ///
    /// Nothing is fetched until the first token is checked.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self, KeyFetchError> {
        let source = RemoteKeySource::new(config.jwks_url.clone(), config.fetch_timeout())?;
        Ok(Self::new(config.validator(), KeyResolver::new(source)))
    }

    /// The validation policy
    pub fn validator(&self) -> &TokenValidator {
        &self.inner.validator
    }

    /// The key cache
    #[must_use]
    pub fn key_resolver(&self) -> &KeyResolver {
        &self.inner.keys
    }

    /// Checks the bearer token in an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AuthorizationError`] if the header or token is
    /// rejected.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Claims, AuthorizationError> {
        self.authenticate_inner(header).await.map_err(rejected)
    }

    /// Checks the bearer token and that it grants `required`
    ///
    /// Nothing about the permission is looked at until the token itself has
    /// been accepted.
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AuthorizationError`] if the token is rejected, and a
    /// 403 one if it does not grant `required`.
    pub async fn authorize(
        &self,
        header: Option<&str>,
        required: &PermissionRef,
    ) -> Result<Claims, AuthorizationError> {
        let claims = self.authenticate_inner(header).await.map_err(rejected)?;

        permission::require_permission(&claims, required).map_err(|err| {
            tracing::debug!(permission = %required, "permission not granted");
            rejected(err)
        })?;

        Ok(claims)
    }

    async fn authenticate_inner(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let token = jwt::extract_bearer(header)?;
        self.inner
            .validator
            .validate_with_clock(token, &self.inner.keys, &*self.inner.clock)
            .await
    }

    /// Fetches the key set now
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the cached set is kept.
    pub async fn refresh(&self) -> Result<(), KeyFetchError> {
        self.inner.keys.refresh().await
    }

    /// Spawns a task that refreshes the key set every `interval`
    ///
    /// Failed refreshes are logged and retried at the next tick. The task
    /// runs until the returned handle is aborted or the runtime shuts down.
    /// Intervals shorter than [`MIN_REFRESH_INTERVAL`] are raised to it.
    pub fn spawn_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        let interval = if interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                used_ms = MIN_REFRESH_INTERVAL.as_millis() as u64,
                "refresh interval too short; using the minimum",
            );
            MIN_REFRESH_INTERVAL
        } else {
            interval
        };

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                timer.tick().await;
                // failures are already logged by the resolver
                let _ = this.refresh().await;
            }
        })
    }
}

fn rejected(err: AuthError) -> AuthorizationError {
    tracing::debug!(auth.code = err.code(), error = %err, "request rejected");
    AuthorizationError::from(err)
}
