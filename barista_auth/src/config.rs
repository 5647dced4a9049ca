//! Settings for an [`Authority`](crate::Authority)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    claims::{Audience, Issuer},
    jwa::Algorithm,
    remote::DEFAULT_FETCH_TIMEOUT,
    validator::TokenValidator,
};

/// What a token must satisfy and where its keys come from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct AuthConfig {
    /// The expected `iss` claim
    pub issuer: Issuer,
    /// The audience that must appear in the `aud` claim
    pub audience: Audience,
    /// The only algorithm tokens may be signed with
    #[serde(default)]
    pub algorithm: Algorithm,
    /// The URL of the provider's JWKS document
    pub jwks_url: String,
    /// How long a key document fetch may take, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl AuthConfig {
    /// Settings for an Auth0 tenant
    ///
    /// The issuer becomes `https://<domain>/` and keys are fetched from
    /// `https://<domain>/.well-known/jwks.json`. A scheme prefix or trailing
    /// slash on `domain` is ignored.
    pub fn auth0(domain: &str, audience: impl Into<Audience>) -> Self {
        let domain = domain
            .trim_start_matches("https://")
            .trim_end_matches('/');

        Self {
            issuer: Issuer::new(format!("https://{domain}/")),
            audience: audience.into(),
            algorithm: Algorithm::default(),
            jwks_url: format!("https://{domain}/.well-known/jwks.json"),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }

    /// The fetch timeout as a duration
    ///
    /// A timeout of zero would fail every fetch, so it falls back to
    /// [`DEFAULT_FETCH_TIMEOUT`].
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        match self.fetch_timeout_secs {
            0 => DEFAULT_FETCH_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }

    /// The validation policy described by these settings
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::new(self.algorithm, self.issuer.clone(), self.audience.clone())
    }
}
